//! Client half of the calculator demo. Calls `AddNumbers` (happy path) and
//! `DivideNumbers` by zero (remote exception, no retry even though the
//! second call asks for `Retry`).

use std::sync::Arc;

use rpc_core::{ClientEngine, InMemoryBacklog, RetryStrategy, RpcClientConfig};
use rpc_transport::ReqwestTransport;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = RpcClientConfig::new("calc-client", "http://127.0.0.1:8080");
    let auth_installer: Arc<dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync> =
        Arc::new(|req: reqwest::RequestBuilder| req.header("X-Client-Id", "calc-client"));
    let transport = Arc::new(ReqwestTransport::with_auth_installer(&config, Some(auth_installer)));
    let engine = ClientEngine::start(vec![], config, transport, Arc::new(InMemoryBacklog::new())).await;

    match engine.execute_on_server("AddNumbers", vec![serde_json::json!(2), serde_json::json!(3)], None, RetryStrategy::None).await {
        Ok(value) => println!("AddNumbers(2, 3) = {value}"),
        Err(e) => println!("AddNumbers failed: {e}"),
    }

    match engine
        .execute_on_server("DivideNumbers", vec![serde_json::json!(1), serde_json::json!(0)], None, RetryStrategy::Retry)
        .await
    {
        Ok(value) => println!("DivideNumbers(1, 0) = {value}"),
        Err(e) => println!("DivideNumbers(1, 0) failed as expected: {e}"),
    }

    engine.stop();
}
