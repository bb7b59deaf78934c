//! Client half of the greeter demo: registers a `SayHello` handler and then
//! just idles, letting the pull loop deliver whatever the server enqueues.

use std::sync::Arc;

use futures::future::BoxFuture;
use rpc_core::{ClientEngine, Handler, InMemoryBacklog, RpcClientConfig, RpcCommand};
use rpc_transport::ReqwestTransport;

const CLIENT_ID: &str = "greeter-client";

struct Greeter;

impl Handler for Greeter {
    fn dispatch<'a>(&'a self, cmd: &'a RpcCommand) -> BoxFuture<'a, Option<Result<serde_json::Value, String>>> {
        Box::pin(async move {
            match cmd.method_name.as_str() {
                "SayHello" => {
                    let name = cmd.method_parameters.first().and_then(|p| p.get("Name")).and_then(|n| n.as_str()).unwrap_or("there");
                    Some(Ok(serde_json::json!(format!("Hello, {name}!"))))
                }
                _ => None,
            }
        })
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = RpcClientConfig::new(CLIENT_ID, "http://127.0.0.1:8081");
    let auth_installer: Arc<dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync> =
        Arc::new(|req: reqwest::RequestBuilder| req.header("X-Client-Id", CLIENT_ID));
    let transport = Arc::new(ReqwestTransport::with_auth_installer(&config, Some(auth_installer)));
    let _engine = ClientEngine::start(vec![Arc::new(Greeter)], config, transport, Arc::new(InMemoryBacklog::new())).await;

    log::info!("{CLIENT_ID} is up, waiting for server-initiated calls");
    std::future::pending::<()>().await;
}
