//! The engine's interface onto the HTTP transport.
//!
//! HTTP transport plumbing (request routing and TLS) lives outside the
//! core; `rpc-transport` supplies the reqwest-backed implementation the
//! `ClientEngine` push/pull loops drive through this trait.

use futures::future::BoxFuture;

use crate::command::{RpcCommand, RpcCommandResult, RpcFailure};

pub trait ClientTransport: Send + Sync {
    /// `POST /push` with `cmd`'s JSON body; the 2xx response is `cmd`'s
    /// result. A transport-layer failure (connection refused, timeout, non
    /// -2xx) should come back as `RpcFailure::network_problem` or
    /// `RpcFailure::timeout`, never panic — the push loop retries on any
    /// `Err`.
    fn push<'a>(&'a self, cmd: &'a RpcCommand) -> BoxFuture<'a, Result<RpcCommandResult, RpcFailure>>;

    /// `POST /pull` carrying `previous_result` (absent on the loop's first
    /// iteration, or after the server reported "nothing yet"). `Ok(None)`
    /// means the server's long-poll window elapsed with no command pending.
    fn pull<'a>(
        &'a self,
        previous_result: Option<&'a RpcCommandResult>,
    ) -> BoxFuture<'a, Result<Option<RpcCommand>, RpcFailure>>;
}
