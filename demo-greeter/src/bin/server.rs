//! Server half of the greeter demo — exercises the server→client call path:
//! the server enqueues `SayHello` for a specific client and awaits the
//! result the client reports on a later `/pull`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rpc_core::{ClientId, InMemoryBacklog, RetryStrategy, RpcServerConfig, ServerEngine};
use rpc_transport::{HeaderAuthenticator, serve};

const TARGET_CLIENT: &str = "greeter-client";

#[tokio::main]
async fn main() {
    env_logger::init();

    let engine = ServerEngine::new(vec![], RpcServerConfig::default(), Arc::new(InMemoryBacklog::new()));
    let authenticator = Arc::new(HeaderAuthenticator::new("X-Client-Id"));

    let caller = engine.clone();
    tokio::spawn(async move {
        // gives the client binary time to connect and arm its first /pull
        // before the server has anything queued for it.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let client = ClientId::from(TARGET_CLIENT);
        loop {
            match caller
                .execute_on_client(&client, "SayHello", vec![serde_json::json!({"Name": "World"})], None, RetryStrategy::None)
                .await
            {
                Ok(value) => log::info!("{TARGET_CLIENT} replied: {value}"),
                Err(e) => log::warn!("SayHello to {TARGET_CLIENT} failed: {e}"),
            }
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    });

    let addr: SocketAddr = "127.0.0.1:8081".parse().unwrap();
    if let Err(e) = serve(addr, engine, authenticator).await {
        log::error!("greeter server exited: {e}");
    }
}
