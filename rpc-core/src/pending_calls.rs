//! Registry of in-flight callers waiting on a command they originated.
//!
//! Distinct from [`crate::peer_cache::PeerCache`]'s result LRU: that cache
//! deduplicates *inbound* commands so a handler runs at most once under
//! retries. This registry instead lets whichever engine originated a call —
//! `ClientEngine::execute_on_server` or `ServerEngine::execute_on_client` —
//! resume the task that's awaiting its result.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::command::{RpcCommandResult, RpcFailure};

#[derive(Default)]
pub struct PendingCalls {
    waiters: Mutex<HashMap<i64, oneshot::Sender<RpcCommandResult>>>,
}

impl PendingCalls {
    pub fn new() -> PendingCalls {
        PendingCalls::default()
    }

    pub fn register(&self, id: i64) -> oneshot::Receiver<RpcCommandResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().expect("pending calls lock poisoned").insert(id, tx);
        rx
    }

    /// Resume the waiter for `result.id`, if one is still registered. A miss
    /// is normal — a duplicate `/push` reply for an already-completed
    /// command, say — so this is silent.
    pub fn complete(&self, result: RpcCommandResult) {
        if let Some(tx) = self.waiters.lock().expect("pending calls lock poisoned").remove(&result.id) {
            let _ = tx.send(result);
        }
    }

    /// Drop a waiter without resuming it, e.g. after its own timeout already
    /// fired locally and a late reply would otherwise be silently ignored.
    pub fn cancel(&self, id: i64) {
        self.waiters.lock().expect("pending calls lock poisoned").remove(&id);
    }

    /// Resume every outstanding waiter with the same failure — used on
    /// engine shutdown, completing in-flight awaits with `Other("shutdown")`.
    pub fn fail_all(&self, failure: RpcFailure) {
        let waiters: Vec<_> = self.waiters.lock().expect("pending calls lock poisoned").drain().collect();
        for (id, tx) in waiters {
            let _ = tx.send(RpcCommandResult::failure(id, failure.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_resumes_the_matching_waiter() {
        let pending = PendingCalls::new();
        let rx = pending.register(1);
        pending.complete(RpcCommandResult::success(1, serde_json::json!(42)));
        let result = rx.await.unwrap();
        assert_eq!(result.return_value, Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn complete_on_unknown_id_is_a_silent_no_op() {
        let pending = PendingCalls::new();
        pending.complete(RpcCommandResult::success(99, serde_json::json!(1)));
    }

    #[tokio::test]
    async fn fail_all_resumes_every_waiter() {
        let pending = PendingCalls::new();
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);
        pending.fail_all(RpcFailure::other("shutdown"));
        assert_eq!(rx1.await.unwrap().failure.unwrap().message, "shutdown");
        assert_eq!(rx2.await.unwrap().failure.unwrap().message, "shutdown");
    }
}
