//! The client half of the engine.
//!
//! A `ClientEngine` owns exactly one [`PeerCache`], for the single peer every
//! client talks to ("the server" — the null-ID convention from
//! [`crate::backlog::PeerId`]). `start` is the only entry point a host
//! application calls; everything else happens on the two spawned loops.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicI64, Ordering},
};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::backlog::{Backlog, PeerId};
use crate::backoff::BackoffPolicy;
use crate::command::{RetryStrategy, RpcCommand, RpcCommandResult, RpcFailure};
use crate::command_runner::{CommandRunner, Handler};
use crate::config::RpcClientConfig;
use crate::peer_cache::PeerCache;
use crate::pending_calls::PendingCalls;
use crate::transport::ClientTransport;

/// The server is this client's one peer, so its `PeerId` is always `None`
/// (`crate::backlog::PeerId`'s "null = the server" convention).
const SERVER_PEER: PeerId = None;

/// A running client engine. `Arc`-shaped because the push and pull loops,
/// and every caller of [`ClientEngine::execute_on_server`], hold a clone.
pub struct ClientEngine {
    config: RpcClientConfig,
    server_cache: Arc<PeerCache>,
    pending: PendingCalls,
    runner: CommandRunner,
    transport: Arc<dyn ClientTransport>,
    backlog: Arc<dyn Backlog>,
    next_id: AtomicI64,
    shutdown: Notify,
    stopped: AtomicBool,
    push_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    pull_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ClientEngine {
    /// Restores any backlogged commands into the server-directed queue, then
    /// spawns the push and pull loops. Idempotent in the sense that calling
    /// it twice produces two independent engines; a host application is
    /// expected to call it once and hold onto the returned handle.
    pub async fn start(
        handlers: Vec<Arc<dyn Handler>>,
        config: RpcClientConfig,
        transport: Arc<dyn ClientTransport>,
        backlog: Arc<dyn Backlog>,
    ) -> Arc<ClientEngine> {
        let server_cache = Arc::new(PeerCache::new(
            config.tunables.queue_bound,
            config.tunables.result_cache_capacity,
        ));

        let mut next_id = 1i64;
        match backlog.peek_all(&SERVER_PEER).await {
            Ok(pending) => {
                for cmd in pending {
                    next_id = next_id.max(cmd.id + 1);
                    if let Err(e) = server_cache.enqueue(cmd) {
                        log::warn!("dropping backlogged command on restore: {e}");
                    }
                }
            }
            Err(e) => log::error!("failed to restore backlog for {}: {e}", config.client_id),
        }

        let engine = Arc::new(ClientEngine {
            config,
            server_cache,
            pending: PendingCalls::new(),
            runner: CommandRunner::new(handlers),
            transport,
            backlog,
            // seeded past every restored command's id so a freshly-issued id
            // can never collide with one still awaiting redelivery — the
            // server's dedup cache is keyed by id alone (§4.3).
            next_id: AtomicI64::new(next_id),
            shutdown: Notify::new(),
            stopped: AtomicBool::new(false),
            push_task: std::sync::Mutex::new(None),
            pull_task: std::sync::Mutex::new(None),
        });

        let push = tokio::spawn(push_loop(engine.clone()));
        let pull = tokio::spawn(pull_loop(engine.clone()));
        *engine.push_task.lock().expect("push task lock poisoned") = Some(push);
        *engine.pull_task.lock().expect("pull task lock poisoned") = Some(pull);
        engine
    }

    /// A client→server stub call. Enqueues `method_name(method_parameters)`
    /// and awaits its result up to `timeout_ms` (falling back to the
    /// engine's configured default). On an RPC-problem failure — `Timeout`,
    /// `NetworkProblem`, or `QueueOverflow` — with a retry strategy other
    /// than `None`, the command is handed to the backlog before the error is
    /// returned, so the caller learns immediately while the command keeps
    /// trying in the background.
    pub async fn execute_on_server(
        &self,
        method_name: impl Into<String>,
        method_parameters: Vec<serde_json::Value>,
        timeout_ms: Option<u64>,
        retry_strategy: RetryStrategy,
    ) -> Result<serde_json::Value, RpcFailure> {
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
        if let Err(e) = self.server_cache.enqueue(cmd.clone()) {
            self.pending.cancel(id);
            return self.backlog_and_fail(cmd, e).await;
        }

        let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(result)) => result,
            // the sender was dropped without a send only on engine shutdown
            // (`PendingCalls::fail_all`) — but that already carries its own
            // failure, so this arm is unreachable in practice; kept defensive.
            Ok(Err(_)) => RpcCommandResult::failure(id, RpcFailure::other("shutdown")),
            Err(_) => {
                self.pending.cancel(id);
                RpcCommandResult::failure(id, RpcFailure::timeout())
            }
        };

        match result.failure {
            Some(failure) => self.backlog_and_fail(cmd, failure).await,
            None => Ok(result.return_value.unwrap_or(serde_json::Value::Null)),
        }
    }

    async fn backlog_and_fail(&self, cmd: RpcCommand, failure: RpcFailure) -> Result<serde_json::Value, RpcFailure> {
        if failure.is_rpc_problem() && cmd.retry_strategy != RetryStrategy::None {
            if let Err(e) = self.backlog.enqueue(&SERVER_PEER, cmd).await {
                log::error!("failed to backlog command after rpc problem: {e}");
            }
        }
        Err(failure)
    }

    /// Signals both loops to exit at their next iteration boundary and
    /// completes every in-flight waiter with `Other("shutdown")`.
    /// Does not join the loop tasks; a host that needs to
    /// wait for full shutdown should hold onto the `JoinHandle`s itself, or
    /// simply drop the engine once `stop` returns.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        self.pending.fail_all(RpcFailure::other("shutdown"));
    }
}

/// Sleeps for `dur`, waking early if `stop()` fires. Returns `true` if the
/// wakeup was a shutdown, so the caller should break its loop immediately
/// rather than retry.
async fn interruptible_sleep(shutdown: &Notify, dur: Duration) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.notified() => true,
        _ = tokio::time::sleep(dur) => false,
    }
}

async fn push_loop(engine: Arc<ClientEngine>) {
    log::info!("push loop started for {}", engine.config.client_id);
    let mut attempts = 0usize;
    loop {
        if engine.stopped.load(Ordering::SeqCst) {
            break;
        }
        let cmd = tokio::select! {
            biased;
            _ = engine.shutdown.notified() => break,
            cmd = engine.server_cache.get_current_command(None) => cmd,
        };
        let Some(cmd) = cmd else { continue };

        match engine.transport.push(&cmd).await {
            Ok(result) => {
                log::debug!("command {} ({}) pushed successfully", cmd.id, cmd.method_name);
                attempts = 0;
                engine.server_cache.finish_current_command(cmd.id);
                if let Err(e) = engine.backlog.remove(&SERVER_PEER, cmd.id).await {
                    log::warn!("failed to drop delivered command {} from backlog: {e}", cmd.id);
                }
                engine.pending.complete(result);
            }
            Err(e) => {
                attempts += 1;
                log::warn!("push of command {} ({}) failed (attempt {attempts}), retrying: {e}", cmd.id, cmd.method_name);
                // the head never advances (finish_current_command wasn't
                // called), so the next iteration re-offers the same command.
                let dur = engine.config.tunables.transport_backoff.retry(attempts, &e).unwrap_or(Duration::from_secs(1));
                if interruptible_sleep(&engine.shutdown, dur).await {
                    break;
                }
            }
        }
    }
    log::info!("push loop stopped for {}", engine.config.client_id);
}

async fn pull_loop(engine: Arc<ClientEngine>) {
    log::info!("pull loop started for {}", engine.config.client_id);
    let mut last_result: Option<RpcCommandResult> = None;
    let mut attempts = 0usize;
    loop {
        if engine.stopped.load(Ordering::SeqCst) {
            break;
        }
        match engine.transport.pull(last_result.as_ref()).await {
            Ok(Some(cmd)) => {
                log::debug!("received command {} ({}) from server", cmd.id, cmd.method_name);
                attempts = 0;
                let result = engine.runner.run(&engine.server_cache, &cmd).await;
                last_result = Some(result);
            }
            Ok(None) => {
                attempts = 0;
                last_result = None;
            }
            Err(e) => {
                attempts += 1;
                log::warn!("pull failed (attempt {attempts}), retrying with the same last result: {e}");
                let dur = engine.config.tunables.transport_backoff.retry(attempts, &e).unwrap_or(Duration::from_secs(1));
                if interruptible_sleep(&engine.shutdown, dur).await {
                    break;
                }
            }
        }
    }
    log::info!("pull loop stopped for {}", engine.config.client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::InMemoryBacklog;
    use crate::command::RpcFailureKind;
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    /// An in-process transport that talks directly to a [`ServerEngine`]
    /// stand-in, so engine behaviour can be exercised without sockets. Holds
    /// its own tiny "server": a shared queue of commands to hand back from
    /// `pull`, and a scripted response for `push`.
    #[derive(Default)]
    struct ScriptedTransport {
        push_calls: AtomicUsize,
        push_responses: StdMutex<Vec<Result<RpcCommandResult, RpcFailure>>>,
        pull_responses: StdMutex<Vec<Result<Option<RpcCommand>, RpcFailure>>>,
    }

    impl ClientTransport for ScriptedTransport {
        fn push<'a>(&'a self, cmd: &'a RpcCommand) -> BoxFuture<'a, Result<RpcCommandResult, RpcFailure>> {
            self.push_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.push_responses.lock().unwrap().pop();
            Box::pin(async move {
                next.unwrap_or_else(|| Ok(RpcCommandResult::success(cmd.id, serde_json::Value::Null)))
            })
        }

        fn pull<'a>(
            &'a self,
            _previous_result: Option<&'a RpcCommandResult>,
        ) -> BoxFuture<'a, Result<Option<RpcCommand>, RpcFailure>> {
            let next = self.pull_responses.lock().unwrap().pop();
            Box::pin(async move { next.unwrap_or(Ok(None)) })
        }
    }

    fn config() -> RpcClientConfig {
        RpcClientConfig::new("test-client", "http://unused")
    }

    #[tokio::test]
    async fn happy_path_returns_the_server_value() {
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .push_responses
            .lock()
            .unwrap()
            .push(Ok(RpcCommandResult::success(1, serde_json::json!(5))));

        let engine = ClientEngine::start(vec![], config(), transport, Arc::new(InMemoryBacklog::new())).await;
        let result = engine
            .execute_on_server("AddNumbers", vec![serde_json::json!(2), serde_json::json!(3)], None, RetryStrategy::None)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(5));
        engine.stop();
    }

    #[tokio::test]
    async fn remote_exception_is_not_backlogged() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_responses.lock().unwrap().push(Ok(RpcCommandResult::failure(
            1,
            RpcFailure::remote_exception("divide by zero"),
        )));

        let backlog = Arc::new(InMemoryBacklog::new());
        let engine = ClientEngine::start(vec![], config(), transport, backlog.clone()).await;
        let err = engine
            .execute_on_server("DivideNumbers", vec![serde_json::json!(1), serde_json::json!(0)], None, RetryStrategy::Retry)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RpcFailureKind::RemoteException);
        assert!(backlog.peek_all(&SERVER_PEER).await.unwrap().is_empty());
        engine.stop();
    }

    #[tokio::test]
    async fn transport_failure_retries_with_backoff_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::default());
        {
            // popped LIFO: the first push() call sees the network error,
            // the retried push() call sees the success.
            let mut pushes = transport.push_responses.lock().unwrap();
            pushes.push(Ok(RpcCommandResult::success(1, serde_json::json!(5))));
            pushes.push(Err(RpcFailure::network_problem("connection reset")));
        }

        let mut cfg = config();
        cfg.tunables.transport_backoff = crate::backoff::Backoff::delay_millis(5);
        let engine = ClientEngine::start(vec![], cfg, transport.clone(), Arc::new(InMemoryBacklog::new())).await;
        let result = engine
            .execute_on_server("AddNumbers", vec![serde_json::json!(2), serde_json::json!(3)], Some(2_000), RetryStrategy::None)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(5));
        assert_eq!(transport.push_calls.load(Ordering::SeqCst), 2);
        engine.stop();
    }

    #[tokio::test]
    async fn restored_backlog_entry_is_delivered_and_then_removed() {
        let backlog = Arc::new(InMemoryBacklog::new());
        backlog
            .enqueue(
                &SERVER_PEER,
                RpcCommand {
                    id: 5,
                    method_name: "Warm".to_owned(),
                    method_parameters: vec![],
                    retry_strategy: RetryStrategy::Retry,
                    timeout_ms: 1_000,
                },
            )
            .await
            .unwrap();

        let transport = Arc::new(ScriptedTransport::default());
        transport
            .push_responses
            .lock()
            .unwrap()
            .push(Ok(RpcCommandResult::success(5, serde_json::Value::Null)));

        let engine = ClientEngine::start(vec![], config(), transport, backlog.clone()).await;
        // give the push loop a moment to deliver the restored command.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            backlog.peek_all(&SERVER_PEER).await.unwrap().is_empty(),
            "a successfully delivered restored command must drain from the backlog"
        );
        engine.stop();
    }

    #[tokio::test]
    async fn freshly_issued_ids_never_collide_with_a_restored_command() {
        let backlog = Arc::new(InMemoryBacklog::new());
        backlog
            .enqueue(
                &SERVER_PEER,
                RpcCommand {
                    id: 5,
                    method_name: "Warm".to_owned(),
                    method_parameters: vec![],
                    retry_strategy: RetryStrategy::Retry,
                    timeout_ms: 1_000,
                },
            )
            .await
            .unwrap();

        let transport = Arc::new(ScriptedTransport::default());
        let engine = ClientEngine::start(vec![], config(), transport, backlog).await;
        assert_eq!(engine.next_id.load(Ordering::SeqCst), 6);
        engine.stop();
    }

    #[tokio::test]
    async fn local_timeout_backlogs_a_retry_strategy_command() {
        struct NeverRespondingTransport;
        impl ClientTransport for NeverRespondingTransport {
            fn push<'a>(&'a self, _cmd: &'a RpcCommand) -> BoxFuture<'a, Result<RpcCommandResult, RpcFailure>> {
                Box::pin(std::future::pending())
            }
            fn pull<'a>(
                &'a self,
                _previous_result: Option<&'a RpcCommandResult>,
            ) -> BoxFuture<'a, Result<Option<RpcCommand>, RpcFailure>> {
                Box::pin(std::future::pending())
            }
        }

        let backlog = Arc::new(InMemoryBacklog::new());
        let engine = ClientEngine::start(vec![], config(), Arc::new(NeverRespondingTransport), backlog.clone()).await;
        let err = engine
            .execute_on_server("Slow", vec![], Some(20), RetryStrategy::Retry)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RpcFailureKind::Timeout);
        let pending = backlog.peek_all(&SERVER_PEER).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method_name, "Slow");
        engine.stop();
    }

    #[tokio::test]
    async fn stop_fails_all_pending_waiters() {
        struct NeverRespondingTransport;
        impl ClientTransport for NeverRespondingTransport {
            fn push<'a>(&'a self, _cmd: &'a RpcCommand) -> BoxFuture<'a, Result<RpcCommandResult, RpcFailure>> {
                Box::pin(std::future::pending())
            }
            fn pull<'a>(
                &'a self,
                _previous_result: Option<&'a RpcCommandResult>,
            ) -> BoxFuture<'a, Result<Option<RpcCommand>, RpcFailure>> {
                Box::pin(std::future::pending())
            }
        }

        let engine = ClientEngine::start(
            vec![],
            config(),
            Arc::new(NeverRespondingTransport),
            Arc::new(InMemoryBacklog::new()),
        )
        .await;
        let engine2 = engine.clone();
        let call = tokio::spawn(async move {
            engine2
                .execute_on_server("Slow", vec![], Some(60_000), RetryStrategy::None)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.stop();
        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.kind, RpcFailureKind::Other);
        assert_eq!(err.message, "shutdown");
    }
}
