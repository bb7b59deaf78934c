//! The reqwest-backed [`ClientTransport`] the client's push/pull loops drive.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rpc_core::{ClientTransport, RpcClientConfig, RpcCommand, RpcCommandResult, RpcFailure};

/// Applied to every outgoing request before it's sent, installing
/// credentials. A closure rather than a trait so a host can plug in a
/// bearer token, a signed header, basic auth, etc. without a new type per
/// scheme.
pub type AuthInstaller = Arc<dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync>;

pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
    auth_installer: Option<AuthInstaller>,
}

impl ReqwestTransport {
    /// Builds an HTTP client whose request timeout covers the server's
    /// long-poll window plus 10s of slack.
    pub fn new(config: &RpcClientConfig) -> ReqwestTransport {
        ReqwestTransport::with_auth_installer(config, None)
    }

    pub fn with_auth_installer(config: &RpcClientConfig, auth_installer: Option<AuthInstaller>) -> ReqwestTransport {
        let timeout = config.tunables.long_poll_window + Duration::from_secs(10);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a plain timeout");
        ReqwestTransport {
            http,
            base_url: config.server_base_url.trim_end_matches('/').to_owned(),
            auth_installer,
        }
    }

    fn install_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_installer {
            Some(install) => install(req),
            None => req,
        }
    }
}

impl ClientTransport for ReqwestTransport {
    fn push<'a>(&'a self, cmd: &'a RpcCommand) -> BoxFuture<'a, Result<RpcCommandResult, RpcFailure>> {
        Box::pin(async move {
            let req = self.install_auth(self.http.post(format!("{}/push", self.base_url)).json(cmd));
            let resp = req.send().await?;
            if !resp.status().is_success() {
                return Err(RpcFailure::network_problem(format!("push returned HTTP {}", resp.status())));
            }
            Ok(resp.json::<RpcCommandResult>().await?)
        })
    }

    fn pull<'a>(
        &'a self,
        previous_result: Option<&'a RpcCommandResult>,
    ) -> BoxFuture<'a, Result<Option<RpcCommand>, RpcFailure>> {
        Box::pin(async move {
            let req = self.http.post(format!("{}/pull", self.base_url));
            let req = match previous_result {
                Some(result) => req.json(result),
                None => req.body(Vec::new()),
            };
            let resp = self.install_auth(req).send().await?;
            if !resp.status().is_success() {
                return Err(RpcFailure::network_problem(format!("pull returned HTTP {}", resp.status())));
            }
            let bytes = resp.bytes().await?;
            if bytes.is_empty() {
                return Ok(None);
            }
            Ok(Some(serde_json::from_slice(&bytes)?))
        })
    }
}
