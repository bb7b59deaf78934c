//! HTTP transport for the `rpc-core` engine: a reqwest sender for the
//! client's push/pull loops, an axum router for the server's `/push`/`/pull`
//! endpoints, and the pluggable authenticator in between.

pub mod client;
pub mod server;
pub mod traits;

pub use client::{AuthInstaller, ReqwestTransport};
pub use server::{router, serve};
pub use traits::{Authenticator, HeaderAuthenticator};
