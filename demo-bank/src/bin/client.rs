//! Client half of the bank demo: ten balance
//! heartbeats fired while the server is unreachable all collapse to one
//! backlog entry (`RetryWhenOnline`'s latest-writer-wins), which is
//! delivered once a fresh engine restores the backlog at `start()`.
//!
//! Run `bank-server` partway through this program's sleep window to see the
//! backlogged heartbeat get delivered on restart.

use std::sync::Arc;

use rpc_core::{Backlog, ClientEngine, FileBacklog, RetryStrategy, RpcClientConfig};
use rpc_transport::ReqwestTransport;

const CLIENT_ID: &str = "bank-client";
const SERVER_URL: &str = "http://127.0.0.1:8082";

fn auth_installer() -> Arc<dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync> {
    Arc::new(|req: reqwest::RequestBuilder| req.header("X-Client-Id", CLIENT_ID))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let backlog_dir = std::env::args().nth(1).unwrap_or_else(|| "./demo-bank-backlog".to_owned());
    let backlog = Arc::new(FileBacklog::new(&backlog_dir).expect("backlog directory should be writable"));

    let config = RpcClientConfig::new(CLIENT_ID, SERVER_URL);
    let transport = Arc::new(ReqwestTransport::with_auth_installer(&config, Some(auth_installer())));
    let engine = ClientEngine::start(vec![], config.clone(), transport, backlog.clone()).await;

    log::info!("sending 10 heartbeats; only the last balance should survive any outage");
    for balance in 1..=10 {
        match engine
            .execute_on_server("Heartbeat", vec![serde_json::json!(balance * 100)], Some(500), RetryStrategy::RetryWhenOnline)
            .await
        {
            Ok(_) => log::info!("heartbeat {balance} acknowledged live"),
            Err(e) => log::warn!("heartbeat {balance} backlogged after failure: {e}"),
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
    engine.stop();

    let pending = backlog.peek_all(&None).await.unwrap_or_default();
    log::info!("{} heartbeat(s) left in the backlog after the run", pending.len());
    if let Some(last) = pending.last() {
        log::info!("surviving backlog entry: {:?}", last.method_parameters);
    }

    log::info!("restarting the engine to replay the backlog against the (hopefully now reachable) server");
    let config = RpcClientConfig::new(CLIENT_ID, SERVER_URL);
    let transport = Arc::new(ReqwestTransport::with_auth_installer(&config, Some(auth_installer())));
    let engine = ClientEngine::start(vec![], config, transport, backlog).await;
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    engine.stop();
}
