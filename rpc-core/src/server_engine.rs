//! The server half of the engine.
//!
//! One `ServerEngine` instance per process, fanning out to one [`PeerCache`]
//! per client ID, created lazily the first time that client's `/pull` or
//! `/push` is handled. The HTTP layer (`rpc-transport`) owns authentication
//! and request routing; this module only knows about already-resolved
//! [`ClientId`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::backlog::{Backlog, PeerId};
use crate::command::{RetryStrategy, RpcCommand, RpcCommandResult, RpcFailure};
use crate::command_runner::{CommandRunner, Handler};
use crate::config::{ClientId, RpcServerConfig};
use crate::peer_cache::PeerCache;
use crate::pending_calls::PendingCalls;

pub struct ServerEngine {
    config: RpcServerConfig,
    runner: CommandRunner,
    peers: AsyncMutex<HashMap<ClientId, Arc<PeerCache>>>,
    pending: PendingCalls,
    backlog: Arc<dyn Backlog>,
    next_id: AtomicI64,
}

impl ServerEngine {
    pub fn new(handlers: Vec<Arc<dyn Handler>>, config: RpcServerConfig, backlog: Arc<dyn Backlog>) -> Arc<ServerEngine> {
        Arc::new(ServerEngine {
            config,
            runner: CommandRunner::new(handlers),
            peers: AsyncMutex::new(HashMap::new()),
            pending: PendingCalls::new(),
            backlog,
            next_id: AtomicI64::new(1),
        })
    }

    /// Looks up (or lazily creates, restoring any backlogged commands) the
    /// `PeerCache` for `client`. Held across the backlog read so two
    /// concurrent first-contacts for the same client can't both restore and
    /// double-enqueue.
    async fn peer_cache_for(&self, client: &ClientId) -> Arc<PeerCache> {
        let mut peers = self.peers.lock().await;
        if let Some(cache) = peers.get(client) {
            return cache.clone();
        }
        let cache = Arc::new(PeerCache::new(self.config.tunables.queue_bound, self.config.tunables.result_cache_capacity));
        let peer: PeerId = Some(client.0.clone());
        match self.backlog.peek_all(&peer).await {
            Ok(pending) => {
                for cmd in pending {
                    if let Err(e) = cache.enqueue(cmd) {
                        log::warn!("dropping backlogged command for {client}: {e}");
                    }
                }
            }
            Err(e) => log::error!("failed to restore backlog for {client}: {e}"),
        }
        peers.insert(client.clone(), cache.clone());
        cache
    }

    /// Dispatch `cmd` to `client`'s Command Runner and hand back its result.
    /// Dedup against repeated delivery of the same command ID happens
    /// inside `CommandRunner::run`.
    pub async fn handle_push(&self, client: &ClientId, cmd: RpcCommand) -> RpcCommandResult {
        let cache = self.peer_cache_for(client).await;
        self.runner.run(&cache, &cmd).await
    }

    /// First resolve the previous result, if any, against the command this
    /// server most recently sent `client`; then long-poll for the next one.
    /// `None` means the poll window elapsed with nothing pending — the
    /// caller should respond 2xx empty.
    pub async fn handle_pull(&self, client: &ClientId, previous_result: Option<RpcCommandResult>) -> Option<RpcCommand> {
        let cache = self.peer_cache_for(client).await;
        if let Some(result) = previous_result {
            let id = result.id;
            cache.finish_current_command(id);
            let peer: PeerId = Some(client.0.clone());
            if let Err(e) = self.backlog.remove(&peer, id).await {
                log::warn!("failed to drop delivered command {id} from backlog for {client}: {e}");
            }
            self.pending.complete(result);
        }
        cache.get_current_command(Some(self.config.tunables.long_poll_window)).await
    }

    /// A server→client stub call (the mirror image of the client's
    /// `execute_on_server`). Enqueues the command into
    /// `client`'s `PeerCache` so the next `/pull` delivers it, and awaits
    /// the result the client reports on a later `/pull`.
    pub async fn execute_on_client(
        &self,
        client: &ClientId,
        method_name: impl Into<String>,
        method_parameters: Vec<serde_json::Value>,
        timeout_ms: Option<u64>,
        retry_strategy: RetryStrategy,
    ) -> Result<serde_json::Value, RpcFailure> {
        let cache = self.peer_cache_for(client).await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout_ms = timeout_ms.unwrap_or(self.config.tunables.default_command_timeout.as_millis() as u64);
        let cmd = RpcCommand {
            id,
            method_name: method_name.into(),
            method_parameters,
            retry_strategy,
            timeout_ms,
        };

        let rx = self.pending.register(id);
        if let Err(e) = cache.enqueue(cmd.clone()) {
            self.pending.cancel(id);
            return self.backlog_and_fail(client, cmd, e).await;
        }

        let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => RpcCommandResult::failure(id, RpcFailure::other("shutdown")),
            Err(_) => {
                self.pending.cancel(id);
                RpcCommandResult::failure(id, RpcFailure::timeout())
            }
        };

        match result.failure {
            Some(failure) => self.backlog_and_fail(client, cmd, failure).await,
            None => Ok(result.return_value.unwrap_or(serde_json::Value::Null)),
        }
    }

    async fn backlog_and_fail(
        &self,
        client: &ClientId,
        cmd: RpcCommand,
        failure: RpcFailure,
    ) -> Result<serde_json::Value, RpcFailure> {
        if failure.is_rpc_problem() && cmd.retry_strategy != RetryStrategy::None {
            let peer: PeerId = Some(client.0.clone());
            if let Err(e) = self.backlog.enqueue(&peer, cmd).await {
                log::error!("failed to backlog command after rpc problem: {e}");
            }
        }
        Err(failure)
    }

    /// Completes every waiter registered by `execute_on_client` across all
    /// clients with `Other("shutdown")`; mirrors `ClientEngine::stop`'s
    /// waiter-draining half for the process-shutdown path. There are no
    /// loops to stop on the server side — every request is its own task,
    /// scoped by the HTTP layer.
    pub fn shutdown(&self) {
        self.pending.fail_all(RpcFailure::other("shutdown"));
    }
}
