//! The per-peer command queue and result dedup cache.
//!
//! A `PeerCache` is the one concurrently-accessed structure in the engine: a
//! single mutex guards the queue, head slot, and LRU, and a [`Notify`] wakes
//! blocked `get_current_command` callers — the async equivalent of a
//! condition variable.

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use hashlink::LruCache;
use tokio::sync::Notify;

use crate::command::{RpcCommand, RpcCommandResult, RpcFailure};

struct Inner {
    queue: VecDeque<RpcCommand>,
    queue_bound: usize,
    results: LruCache<i64, RpcCommandResult>,
    /// Highest command ID known to have aged out of `results` before being
    /// retrieved. Used to distinguish "never arrived" from "evicted" when a
    /// caller checks for a result that should have been cached.
    last_evicted_id: Option<i64>,
}

pub struct PeerCache {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl PeerCache {
    pub fn new(queue_bound: usize, result_cache_capacity: usize) -> PeerCache {
        PeerCache {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                queue_bound,
                results: LruCache::new(result_cache_capacity),
                last_evicted_id: None,
            }),
            notify: Notify::new(),
        }
    }

    /// Append to the FIFO. Fails with `QueueOverflow` once the queue is at
    /// its bound. Wakes any waiter blocked in `get_current_command`.
    pub fn enqueue(&self, cmd: RpcCommand) -> Result<(), RpcFailure> {
        let mut inner = self.inner.lock().expect("peer cache lock poisoned");
        if inner.queue.len() >= inner.queue_bound {
            return Err(RpcFailure::queue_overflow(inner.queue_bound));
        }
        inner.queue.push_back(cmd);
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// Return the head of the queue without dequeuing it, blocking up to
    /// `timeout` (`None` = forever). The head must stay visible across a
    /// retried `/pull` that lost its response to a network failure — only
    /// `finish_current_command` advances the queue.
    pub async fn get_current_command(&self, timeout: Option<Duration>) -> Option<RpcCommand> {
        loop {
            let notified = self.notify.notified();
            {
                let inner = self.inner.lock().expect("peer cache lock poisoned");
                if let Some(head) = inner.queue.front() {
                    return Some(head.clone());
                }
            }
            match timeout {
                Some(dur) => {
                    if tokio::time::timeout(dur, notified).await.is_err() {
                        return None;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Pop the head; a no-op if the head has already changed (defensive
    /// against a stale `finish` racing a fresh enqueue).
    pub fn finish_current_command(&self, id: i64) {
        let mut inner = self.inner.lock().expect("peer cache lock poisoned");
        if inner.queue.front().map(|c| c.id) == Some(id) {
            inner.queue.pop_front();
        }
    }

    pub fn cache_result(&self, result: RpcCommandResult) {
        let mut inner = self.inner.lock().expect("peer cache lock poisoned");
        let id = result.id;
        if inner.results.len() >= inner.results.capacity() && !inner.results.contains_key(&id) {
            if let Some((evicted_id, _)) = inner.results.remove_lru() {
                inner.last_evicted_id = Some(match inner.last_evicted_id {
                    Some(prev) => prev.max(evicted_id),
                    None => evicted_id,
                });
            }
        }
        inner.results.insert(id, result);
    }

    pub fn get_cached_result(&self, id: i64) -> Option<RpcCommandResult> {
        let mut inner = self.inner.lock().expect("peer cache lock poisoned");
        inner.results.get(&id).cloned()
    }

    /// True if `id` is old enough that, had it ever been cached, it would
    /// already have been evicted — used to answer "obsolete" rather than
    /// silently re-executing a command whose result we can no longer prove
    /// we already produced.
    pub fn is_obsolete(&self, id: i64) -> bool {
        let inner = self.inner.lock().expect("peer cache lock poisoned");
        inner.last_evicted_id.is_some_and(|evicted| id <= evicted)
    }

    #[cfg(test)]
    pub fn queue_len(&self) -> usize {
        self.inner.lock().expect("peer cache lock poisoned").queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RetryStrategy;

    fn cmd(id: i64) -> RpcCommand {
        RpcCommand {
            id,
            method_name: "Noop".to_owned(),
            method_parameters: vec![],
            retry_strategy: RetryStrategy::None,
            timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn enqueue_then_get_returns_head_without_popping() {
        let cache = PeerCache::new(10, 100);
        cache.enqueue(cmd(1)).unwrap();
        let head = cache.get_current_command(Some(Duration::from_millis(50))).await;
        assert_eq!(head.unwrap().id, 1);
        assert_eq!(cache.queue_len(), 1, "head must remain visible until finished");
    }

    #[tokio::test]
    async fn finish_pops_only_the_matching_head() {
        let cache = PeerCache::new(10, 100);
        cache.enqueue(cmd(1)).unwrap();
        cache.enqueue(cmd(2)).unwrap();
        cache.finish_current_command(99); // stale id, no-op
        assert_eq!(cache.queue_len(), 2);
        cache.finish_current_command(1);
        assert_eq!(cache.queue_len(), 1);
        let head = cache.get_current_command(Some(Duration::from_millis(50))).await;
        assert_eq!(head.unwrap().id, 2);
    }

    #[tokio::test]
    async fn queue_overflow_past_bound() {
        let cache = PeerCache::new(1, 100);
        cache.enqueue(cmd(1)).unwrap();
        let err = cache.enqueue(cmd(2)).unwrap_err();
        assert_eq!(err.kind, crate::command::RpcFailureKind::QueueOverflow);
    }

    #[tokio::test]
    async fn get_current_command_times_out_when_empty() {
        let cache = PeerCache::new(10, 100);
        let head = cache.get_current_command(Some(Duration::from_millis(20))).await;
        assert!(head.is_none());
    }

    #[tokio::test]
    async fn get_current_command_wakes_on_enqueue() {
        let cache = std::sync::Arc::new(PeerCache::new(10, 100));
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_current_command(None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.enqueue(cmd(7)).unwrap();
        let head = waiter.await.unwrap();
        assert_eq!(head.unwrap().id, 7);
    }

    #[tokio::test]
    async fn result_cache_dedups_and_evicts_oldest() {
        let cache = PeerCache::new(10, 2);
        cache.cache_result(RpcCommandResult::success(1, serde_json::json!(1)));
        cache.cache_result(RpcCommandResult::success(2, serde_json::json!(2)));
        assert!(cache.get_cached_result(1).is_some());
        cache.cache_result(RpcCommandResult::success(3, serde_json::json!(3)));
        // the get above touched id 1, making id 2 the least-recently-used
        // entry, so it is the one evicted.
        assert!(cache.get_cached_result(2).is_none());
        assert!(cache.is_obsolete(2));
        assert!(cache.get_cached_result(1).is_some());
        assert!(cache.get_cached_result(3).is_some());
    }
}
