//! A pluggable function from an HTTP request to a client identifier, kept
//! outside the core engine.

use axum::http::HeaderMap;
use futures::future::BoxFuture;
use rpc_core::ClientId;

pub trait Authenticator: Send + Sync {
    /// Resolve a client ID from the request headers, or `None` if the
    /// request carries no valid credentials — the endpoint then answers
    /// HTTP 401.
    fn authenticate<'a>(&'a self, headers: &'a HeaderMap) -> BoxFuture<'a, Option<ClientId>>;
}

/// A minimal authenticator for demos and tests: the client ID is taken
/// verbatim from a configurable header. Production hosts plug in their own
/// `Authenticator` (a signed token, mTLS identity, session lookup, …) — the
/// engine only ever consumes the resolved `ClientId`.
pub struct HeaderAuthenticator {
    header_name: String,
}

impl HeaderAuthenticator {
    pub fn new(header_name: impl Into<String>) -> HeaderAuthenticator {
        HeaderAuthenticator {
            header_name: header_name.into(),
        }
    }
}

impl Authenticator for HeaderAuthenticator {
    fn authenticate<'a>(&'a self, headers: &'a HeaderMap) -> BoxFuture<'a, Option<ClientId>> {
        Box::pin(async move {
            headers
                .get(self.header_name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(ClientId::from)
        })
    }
}
