//! Durable retry storage.
//!
//! The engine consults a `Backlog` on `start()` to repopulate pending work,
//! and hands a command to it whenever `execute_on_server` raises an
//! RPC-problem error for a command whose [`RetryStrategy`] isn't `None`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use futures::future::BoxFuture;

use crate::command::{RetryStrategy, RpcCommand, RpcFailure};

/// `None` identifies "the server" — the single peer a `ClientEngine` talks
/// to. `Some(client_id)` identifies one client from a `ServerEngine`'s point
/// of view.
pub type PeerId = Option<String>;

pub trait Backlog: Send + Sync {
    /// Store `cmd` for later redelivery to `peer`. The strategy is read off
    /// `cmd.retry_strategy`: `RetryWhenOnline` replaces any backlogged
    /// command for the same peer and method rather than appending
    /// (latest-writer-wins, for heartbeat-style updates); `Retry` appends,
    /// preserving order relative to other `Retry` commands for that peer.
    /// Callers should not hand a `None`-strategy command to the backlog at
    /// all — it should never reappear once it fails.
    fn enqueue<'a>(&'a self, peer: &'a PeerId, cmd: RpcCommand) -> BoxFuture<'a, Result<(), RpcFailure>>;

    fn peek_all<'a>(&'a self, peer: &'a PeerId) -> BoxFuture<'a, Result<Vec<RpcCommand>, RpcFailure>>;

    fn remove<'a>(&'a self, peer: &'a PeerId, id: i64) -> BoxFuture<'a, Result<(), RpcFailure>>;
}

fn replace_or_append(entries: &mut Vec<RpcCommand>, cmd: RpcCommand) {
    match cmd.retry_strategy {
        RetryStrategy::RetryWhenOnline => {
            if let Some(slot) = entries.iter_mut().find(|c| c.method_name == cmd.method_name) {
                *slot = cmd;
                return;
            }
            entries.push(cmd);
        }
        _ => entries.push(cmd),
    }
}

/// An in-process backlog. Durable across retries within one run, but not
/// across restarts — suitable for tests and for hosts that accept losing
/// queued work on crash.
#[derive(Default)]
pub struct InMemoryBacklog {
    peers: Mutex<HashMap<PeerId, Vec<RpcCommand>>>,
}

impl InMemoryBacklog {
    pub fn new() -> InMemoryBacklog {
        InMemoryBacklog::default()
    }
}

impl Backlog for InMemoryBacklog {
    fn enqueue<'a>(&'a self, peer: &'a PeerId, cmd: RpcCommand) -> BoxFuture<'a, Result<(), RpcFailure>> {
        Box::pin(async move {
            let mut peers = self.peers.lock().expect("backlog lock poisoned");
            replace_or_append(peers.entry(peer.clone()).or_default(), cmd);
            Ok(())
        })
    }

    fn peek_all<'a>(&'a self, peer: &'a PeerId) -> BoxFuture<'a, Result<Vec<RpcCommand>, RpcFailure>> {
        Box::pin(async move {
            let peers = self.peers.lock().expect("backlog lock poisoned");
            Ok(peers.get(peer).cloned().unwrap_or_default())
        })
    }

    fn remove<'a>(&'a self, peer: &'a PeerId, id: i64) -> BoxFuture<'a, Result<(), RpcFailure>> {
        Box::pin(async move {
            let mut peers = self.peers.lock().expect("backlog lock poisoned");
            if let Some(entries) = peers.get_mut(peer) {
                entries.retain(|c| c.id != id);
            }
            Ok(())
        })
    }
}

/// A backlog persisted as one JSON-lines file per peer, so per-peer enqueue
/// order survives a process restart. Writes serialise through a single
/// mutex and rewrite the whole file; the file layout is otherwise an
/// implementation detail of this backend.
pub struct FileBacklog {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileBacklog {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<FileBacklog> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(FileBacklog {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn path_for(&self, peer: &PeerId) -> PathBuf {
        let key = match peer {
            None => "server".to_owned(),
            Some(id) => sanitize(id),
        };
        self.dir.join(format!("backlog-{key}.jsonl"))
    }

    fn read(path: &Path) -> std::io::Result<Vec<RpcCommand>> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(contents
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| serde_json::from_str(l).ok())
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn write(path: &Path, entries: &[RpcCommand]) -> std::io::Result<()> {
        let mut body = String::new();
        for entry in entries {
            body.push_str(&serde_json::to_string(entry).expect("RpcCommand always serialises"));
            body.push('\n');
        }
        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl Backlog for FileBacklog {
    fn enqueue<'a>(&'a self, peer: &'a PeerId, cmd: RpcCommand) -> BoxFuture<'a, Result<(), RpcFailure>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let path = self.path_for(peer);
            let mut entries = Self::read(&path)?;
            replace_or_append(&mut entries, cmd);
            Self::write(&path, &entries)?;
            Ok(())
        })
    }

    fn peek_all<'a>(&'a self, peer: &'a PeerId) -> BoxFuture<'a, Result<Vec<RpcCommand>, RpcFailure>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            Ok(Self::read(&self.path_for(peer))?)
        })
    }

    fn remove<'a>(&'a self, peer: &'a PeerId, id: i64) -> BoxFuture<'a, Result<(), RpcFailure>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let path = self.path_for(peer);
            let mut entries = Self::read(&path)?;
            entries.retain(|c| c.id != id);
            Self::write(&path, &entries)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(id: i64, method: &str, strategy: RetryStrategy) -> RpcCommand {
        RpcCommand {
            id,
            method_name: method.to_owned(),
            method_parameters: vec![],
            retry_strategy: strategy,
            timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn retry_when_online_replaces_same_method() {
        let backlog = InMemoryBacklog::new();
        let peer: PeerId = Some("client-1".to_owned());
        for n in 0..10 {
            backlog
                .enqueue(&peer, cmd(n, "Heartbeat", RetryStrategy::RetryWhenOnline))
                .await
                .unwrap();
        }
        let pending = backlog.peek_all(&peer).await.unwrap();
        assert_eq!(pending.len(), 1, "only the latest heartbeat should remain");
        assert_eq!(pending[0].id, 9);
    }

    #[tokio::test]
    async fn retry_preserves_order_across_distinct_commands() {
        let backlog = InMemoryBacklog::new();
        let peer: PeerId = None;
        backlog.enqueue(&peer, cmd(1, "A", RetryStrategy::Retry)).await.unwrap();
        backlog.enqueue(&peer, cmd(2, "B", RetryStrategy::Retry)).await.unwrap();
        let pending = backlog.peek_all(&peer).await.unwrap();
        assert_eq!(pending.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn remove_drops_only_the_named_command() {
        let backlog = InMemoryBacklog::new();
        let peer: PeerId = None;
        backlog.enqueue(&peer, cmd(1, "A", RetryStrategy::Retry)).await.unwrap();
        backlog.enqueue(&peer, cmd(2, "B", RetryStrategy::Retry)).await.unwrap();
        backlog.remove(&peer, 1).await.unwrap();
        let pending = backlog.peek_all(&peer).await.unwrap();
        assert_eq!(pending.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn file_backlog_survives_a_fresh_instance() {
        let dir = tempfile::tempdir().unwrap();
        let peer: PeerId = Some("client-9".to_owned());
        {
            let backlog = FileBacklog::new(dir.path()).unwrap();
            backlog.enqueue(&peer, cmd(1, "Ping", RetryStrategy::Retry)).await.unwrap();
            backlog.enqueue(&peer, cmd(2, "Pong", RetryStrategy::Retry)).await.unwrap();
        }
        let reopened = FileBacklog::new(dir.path()).unwrap();
        let pending = reopened.peek_all(&peer).await.unwrap();
        assert_eq!(pending.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2]);
    }
}
