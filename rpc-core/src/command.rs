//! Wire types shared by both halves of the engine: a command, its result, and
//! the failure taxonomy a result may carry instead of a return value.

use serde::{Deserialize, Serialize};

/// A single request for a remote method invocation.
///
/// Arguments are carried as an ordered list of pre-serialised JSON fragments
/// rather than a single object, so a dispatcher can pull each by position
/// without knowing the target type up front.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcCommand {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "MethodName")]
    pub method_name: String,
    #[serde(rename = "MethodParameters")]
    pub method_parameters: Vec<serde_json::Value>,
    #[serde(rename = "RetryStrategy")]
    pub retry_strategy: RetryStrategy,
    #[serde(rename = "TimeoutMs")]
    pub timeout_ms: u64,
}

/// How a failed command is handled by the durable [`crate::backlog::Backlog`].
///
/// This is the per-command annotation governing backlog retry, distinct
/// from the transport-level backoff cadence used by the push/pull loops
/// themselves (see [`crate::backoff::Backoff`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryStrategy {
    None,
    Retry,
    RetryWhenOnline,
}

/// The outcome of executing one [`RpcCommand`].
///
/// Exactly one of `return_value`/`failure` is set; callers should prefer
/// [`RpcCommandResult::success`] and [`RpcCommandResult::failure`] over
/// constructing this directly so that invariant can't be violated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcCommandResult {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "ReturnValue")]
    pub return_value: Option<serde_json::Value>,
    #[serde(rename = "Failure")]
    pub failure: Option<RpcFailure>,
}

impl RpcCommandResult {
    pub fn success(id: i64, return_value: serde_json::Value) -> RpcCommandResult {
        RpcCommandResult {
            id,
            success: true,
            return_value: Some(return_value),
            failure: None,
        }
    }

    pub fn failure(id: i64, failure: RpcFailure) -> RpcCommandResult {
        RpcCommandResult {
            id,
            success: false,
            return_value: None,
            failure: Some(failure),
        }
    }
}

/// A failure kind, carried inside an [`RpcCommandResult`] or returned from a
/// waiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcFailureKind {
    Timeout,
    QueueOverflow,
    RemoteException,
    NetworkProblem,
    Obsolete,
    Other,
}

impl RpcFailureKind {
    /// An "RPC problem" (transport or local resource exhaustion) is eligible
    /// for the backlog; a `RemoteException` means the remote already ran the
    /// handler, so retrying it is unsafe.
    pub fn is_rpc_problem(&self) -> bool {
        matches!(
            self,
            RpcFailureKind::Timeout | RpcFailureKind::NetworkProblem | RpcFailureKind::QueueOverflow
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcFailure {
    #[serde(rename = "Type")]
    pub kind: RpcFailureKind,
    #[serde(rename = "Message")]
    pub message: String,
}

impl RpcFailure {
    pub fn new(kind: RpcFailureKind, message: impl Into<String>) -> RpcFailure {
        RpcFailure {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout() -> RpcFailure {
        RpcFailure::new(RpcFailureKind::Timeout, "waiter deadline elapsed")
    }

    pub fn queue_overflow(bound: usize) -> RpcFailure {
        RpcFailure::new(
            RpcFailureKind::QueueOverflow,
            format!("peer queue exceeded bound of {bound}"),
        )
    }

    pub fn remote_exception(message: impl Into<String>) -> RpcFailure {
        RpcFailure::new(RpcFailureKind::RemoteException, message)
    }

    pub fn network_problem(message: impl Into<String>) -> RpcFailure {
        RpcFailure::new(RpcFailureKind::NetworkProblem, message)
    }

    pub fn obsolete(id: i64) -> RpcFailure {
        RpcFailure::new(
            RpcFailureKind::Obsolete,
            format!("result for command {id} aged out of the dedup cache"),
        )
    }

    pub fn other(message: impl Into<String>) -> RpcFailure {
        RpcFailure::new(RpcFailureKind::Other, message)
    }

    pub fn is_rpc_problem(&self) -> bool {
        self.kind.is_rpc_problem()
    }
}

impl crate::backoff::BackoffError for RpcFailure {
    fn should_retry(&self) -> bool {
        self.is_rpc_problem()
    }
}

impl std::fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RpcFailure {}

impl axum::response::IntoResponse for RpcFailure {
    fn into_response(self) -> axum::response::Response {
        let status = match self.kind {
            RpcFailureKind::Other => axum::http::StatusCode::BAD_REQUEST,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, axum::Json(self)).into_response()
    }
}

impl From<reqwest::Error> for RpcFailure {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            RpcFailure::timeout()
        } else {
            RpcFailure::network_problem(format!("http error: {value}"))
        }
    }
}

impl From<serde_json::Error> for RpcFailure {
    fn from(value: serde_json::Error) -> Self {
        RpcFailure::other(format!("json error: {value}"))
    }
}

impl From<std::io::Error> for RpcFailure {
    fn from(value: std::io::Error) -> Self {
        RpcFailure::other(format!("io error: {value}"))
    }
}

impl From<tokio::task::JoinError> for RpcFailure {
    fn from(value: tokio::task::JoinError) -> Self {
        match value.try_into_panic() {
            Ok(e) => std::panic::resume_unwind(e),
            Err(e) => match e.is_cancelled() {
                true => RpcFailure::other("task cancelled"),
                false => RpcFailure::other("tokio join error"),
            },
        }
    }
}
