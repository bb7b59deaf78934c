//! The transport-agnostic bidirectional RPC engine.
//!
//! Depends on `serde`/`serde_json` for the wire types and on `axum`'s
//! `IntoResponse` for [`command::RpcFailure`], but not on any concrete HTTP
//! client or server — those live in `rpc-transport`, which drives the
//! [`transport::ClientTransport`] trait and the [`client_engine::ClientEngine`]
//! / [`server_engine::ServerEngine`] handle methods from outside.

pub mod backlog;
pub mod backoff;
pub mod client_engine;
pub mod command;
pub mod command_runner;
pub mod config;
pub mod peer_cache;
pub mod pending_calls;
pub mod server_engine;
pub mod transport;

pub use backlog::{Backlog, FileBacklog, InMemoryBacklog, PeerId};
pub use backoff::{Backoff, BackoffError, BackoffPolicy, TRANSPORT_BACKOFF};
pub use command::{RetryStrategy, RpcCommand, RpcCommandResult, RpcFailure, RpcFailureKind};
pub use command_runner::{CommandRunner, Handler};
pub use config::{ClientId, RpcClientConfig, RpcServerConfig, Tunables};
pub use peer_cache::PeerCache;
pub use transport::ClientTransport;

pub use client_engine::ClientEngine;
pub use server_engine::ServerEngine;
