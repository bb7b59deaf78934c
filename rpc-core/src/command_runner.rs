//! Method dispatch with at-most-once execution under retries.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, future::BoxFuture};

use crate::command::{RpcCommand, RpcCommandResult, RpcFailure};
use crate::peer_cache::PeerCache;

/// A dispatcher that selects by method name. Registered handlers are tried
/// in order; the first one whose `dispatch` returns `Some(..)` wins.
pub trait Handler: Send + Sync {
    fn dispatch<'a>(
        &'a self,
        cmd: &'a RpcCommand,
    ) -> BoxFuture<'a, Option<Result<serde_json::Value, String>>>;
}

/// Runs commands against a handler list, deduplicating by consulting the
/// owning [`PeerCache`]'s result cache before invoking anything.
pub struct CommandRunner {
    handlers: Vec<Arc<dyn Handler>>,
}

impl CommandRunner {
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> CommandRunner {
        CommandRunner { handlers }
    }

    /// (a) return a cached result verbatim if this exact command ID was
    /// already executed; (b) otherwise invoke the first matching handler;
    /// (c) turn a handler panic or unknown method into a failure result;
    /// (d) cache the result before returning it.
    pub async fn run(&self, peer_cache: &PeerCache, cmd: &RpcCommand) -> RpcCommandResult {
        if let Some(cached) = peer_cache.get_cached_result(cmd.id) {
            log::debug!("command {} already executed, returning cached result", cmd.id);
            return cached;
        }
        if peer_cache.is_obsolete(cmd.id) {
            log::warn!("command {} aged out of the dedup cache before execution", cmd.id);
            return RpcCommandResult::failure(cmd.id, RpcFailure::obsolete(cmd.id));
        }

        let result = self.dispatch_once(cmd).await;
        peer_cache.cache_result(result.clone());
        result
    }

    async fn dispatch_once(&self, cmd: &RpcCommand) -> RpcCommandResult {
        for handler in &self.handlers {
            let outcome = AssertUnwindSafe(handler.dispatch(cmd)).catch_unwind().await;
            match outcome {
                Ok(Some(Ok(value))) => return RpcCommandResult::success(cmd.id, value),
                Ok(Some(Err(message))) => {
                    return RpcCommandResult::failure(cmd.id, RpcFailure::remote_exception(message));
                }
                Ok(None) => continue,
                Err(panic) => {
                    return RpcCommandResult::failure(
                        cmd.id,
                        RpcFailure::remote_exception(panic_message(panic)),
                    );
                }
            }
        }
        RpcCommandResult::failure(
            cmd.id,
            RpcFailure::other(format!("method not found: {}", cmd.method_name)),
        )
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}
