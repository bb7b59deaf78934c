//! The axum router implementing `/push` and `/pull`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use rpc_core::{ClientId, RpcCommandResult, RpcFailure, ServerEngine};

use crate::traits::Authenticator;

struct ServerState {
    engine: Arc<ServerEngine>,
    authenticator: Arc<dyn Authenticator>,
}

/// Endpoint-level failures, distinct from [`RpcFailure`]: these never reach
/// a peer's `RpcCommandResult`, they're the HTTP response for a request the
/// engine never got to look at: 401 if authentication returns null, 400 for
/// malformed bodies, 500 for internal errors.
enum ApiError {
    Unauthorized,
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthenticated").into_response(),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
        }
    }
}

async fn authenticate(state: &ServerState, headers: &HeaderMap) -> Result<ClientId, ApiError> {
    state.authenticator.authenticate(headers).await.ok_or(ApiError::Unauthorized)
}

/// `POST /push`: client → server call. A transport/handler-level failure
/// still comes back as a 2xx `RpcCommandResult` with `success: false` — only
/// auth and parse failures are HTTP errors.
async fn push_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RpcCommandResult>, ApiError> {
    let client_id = authenticate(&state, &headers).await?;
    let cmd = serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("malformed RpcCommand: {e}")))?;
    log::debug!("push from {client_id}");
    let result = state.engine.handle_push(&client_id, cmd).await;
    Ok(Json(result))
}

/// `POST /pull`: result delivery plus long-poll for the next server → client
/// command. Body is `RpcCommandResult` JSON, or empty on the loop's first
/// iteration / after the prior poll returned nothing.
async fn pull_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let client_id = authenticate(&state, &headers).await?;
    let previous_result = if body.is_empty() {
        None
    } else {
        Some(serde_json::from_slice::<RpcCommandResult>(&body).map_err(|e| ApiError::BadRequest(format!("malformed RpcCommandResult: {e}")))?)
    };
    match state.engine.handle_pull(&client_id, previous_result).await {
        Some(cmd) => Ok(Json(cmd).into_response()),
        None => Ok(StatusCode::OK.into_response()),
    }
}

pub fn router(engine: Arc<ServerEngine>, authenticator: Arc<dyn Authenticator>) -> Router {
    let state = Arc::new(ServerState { engine, authenticator });
    Router::new()
        .route("/push", post(push_handler))
        .route("/pull", post(pull_handler))
        .with_state(state)
}

/// Binds `addr` and serves `/push`/`/pull` until the process exits. Demos
/// and tests that need the bound port (e.g. binding to `:0`) should build
/// the listener themselves and call [`axum::serve`] with [`router`] directly.
pub async fn serve(addr: SocketAddr, engine: Arc<ServerEngine>, authenticator: Arc<dyn Authenticator>) -> Result<(), RpcFailure> {
    let app = router(engine, authenticator);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("rpc server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
