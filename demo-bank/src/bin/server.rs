//! Server half of the bank demo: accepts `Heartbeat` balance pings from a
//! client whose connectivity may have flapped.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::BoxFuture;
use rpc_core::{Handler, InMemoryBacklog, RpcCommand, RpcServerConfig, ServerEngine};
use rpc_transport::{HeaderAuthenticator, serve};

struct BankAccount;

impl Handler for BankAccount {
    fn dispatch<'a>(&'a self, cmd: &'a RpcCommand) -> BoxFuture<'a, Option<Result<serde_json::Value, String>>> {
        Box::pin(async move {
            match cmd.method_name.as_str() {
                "Heartbeat" => {
                    let balance = cmd.method_parameters.first().cloned().unwrap_or(serde_json::json!(0));
                    log::info!("recorded balance heartbeat: {balance}");
                    Some(Ok(serde_json::json!("ack")))
                }
                _ => None,
            }
        })
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let engine = ServerEngine::new(
        vec![Arc::new(BankAccount)],
        RpcServerConfig::default(),
        Arc::new(InMemoryBacklog::new()),
    );
    let authenticator = Arc::new(HeaderAuthenticator::new("X-Client-Id"));

    let addr: SocketAddr = "127.0.0.1:8082".parse().unwrap();
    if let Err(e) = serve(addr, engine, authenticator).await {
        log::error!("bank server exited: {e}");
    }
}
