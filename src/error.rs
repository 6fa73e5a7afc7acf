use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Errors surfaced across the relay's HTTP and WebSocket boundary.
///
/// Mirrors the error-kind taxonomy of the wire spec (transport, auth,
/// crypto, protocol, conflict, timeout) without tying the internal
/// plumbing — which uses `anyhow` — to a single enum.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("timeout")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RelayError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            RelayError::InvalidArgument(m) => (StatusCode::BAD_REQUEST, m.clone()),
            RelayError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            RelayError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            RelayError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            RelayError::Timeout => (StatusCode::REQUEST_TIMEOUT, "timeout".to_string()),
            RelayError::Transport(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            RelayError::Internal(e) => {
                tracing::error!(err = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

/// Errors surfaced by the client session to its host application.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("send timed out")]
    Timeout,

    #[error("session terminated")]
    Terminated,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
