//! Engine-wide tunables.
//!
//! Defaults such as the command timeout are fields of a configuration value
//! supplied at `start()` rather than process-wide mutable state.

use std::time::Duration;

use crate::backoff::{Backoff, TRANSPORT_BACKOFF};

/// Identifies one client deployment. Unique per deployment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        ClientId(value.to_owned())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        ClientId(value)
    }
}

/// Immutable once `start()` is called.
#[derive(Clone, Debug)]
pub struct RpcClientConfig {
    pub client_id: ClientId,
    pub server_base_url: String,
    pub tunables: Tunables,
}

impl RpcClientConfig {
    pub fn new(client_id: impl Into<ClientId>, server_base_url: impl Into<String>) -> Self {
        RpcClientConfig {
            client_id: client_id.into(),
            server_base_url: server_base_url.into(),
            tunables: Tunables::default(),
        }
    }

    pub fn with_tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }
}

#[derive(Clone, Debug)]
pub struct RpcServerConfig {
    pub tunables: Tunables,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        RpcServerConfig {
            tunables: Tunables::default(),
        }
    }
}

/// Tunable constants, collected so they can be overridden per deployment
/// instead of compiled in.
#[derive(Clone, Debug)]
pub struct Tunables {
    /// Maximum silence on `/pull` before the server responds with an empty
    /// body and the client re-arms. Default 90s.
    pub long_poll_window: Duration,
    /// Per-peer outbound queue bound. Default 10.
    pub queue_bound: usize,
    /// Result-cache (dedup LRU) capacity per peer. Default 100; must be
    /// at least the maximum number of commands concurrently outstanding.
    pub result_cache_capacity: usize,
    /// Default per-command timeout when the caller doesn't specify one.
    /// Default 30s.
    pub default_command_timeout: Duration,
    /// Retry cadence for a transport-failed push/pull HTTP call. Default
    /// [`TRANSPORT_BACKOFF`] (fixed 1s, unbounded attempts).
    pub transport_backoff: Backoff,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            long_poll_window: Duration::from_millis(90_000),
            queue_bound: 10,
            result_cache_capacity: 100,
            default_command_timeout: Duration::from_millis(30_000),
            transport_backoff: TRANSPORT_BACKOFF,
        }
    }
}
