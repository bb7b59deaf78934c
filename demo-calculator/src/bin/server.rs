//! Server half of the calculator demo — exercises the client→server call
//! path: `AddNumbers`, `DivideNumbers`.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::BoxFuture;
use rpc_core::{Handler, InMemoryBacklog, RpcCommand, RpcServerConfig, ServerEngine};
use rpc_transport::{HeaderAuthenticator, serve};

struct Calculator;

impl Handler for Calculator {
    fn dispatch<'a>(&'a self, cmd: &'a RpcCommand) -> BoxFuture<'a, Option<Result<serde_json::Value, String>>> {
        Box::pin(async move {
            match cmd.method_name.as_str() {
                "AddNumbers" => {
                    let a = cmd.method_parameters[0].as_f64().unwrap_or_default();
                    let b = cmd.method_parameters[1].as_f64().unwrap_or_default();
                    Some(Ok(serde_json::json!(a + b)))
                }
                "DivideNumbers" => {
                    let a = cmd.method_parameters[0].as_f64().unwrap_or_default();
                    let b = cmd.method_parameters[1].as_f64().unwrap_or_default();
                    if b == 0.0 {
                        Some(Err("attempted to divide by zero".to_owned()))
                    } else {
                        Some(Ok(serde_json::json!(a / b)))
                    }
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
        vec![Arc::new(Calculator)],
        RpcServerConfig::default(),
        Arc::new(InMemoryBacklog::new()),
    );
    let authenticator = Arc::new(HeaderAuthenticator::new("X-Client-Id"));

    let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
    if let Err(e) = serve(addr, engine, authenticator).await {
        log::error!("calculator server exited: {e}");
    }
}
