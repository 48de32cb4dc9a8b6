//! API error taxonomy and the `{ data | error }` response envelope.
//!
//! Every handler returns `Result<_, ApiError>`; the mapping to status codes
//! is fixed here and nowhere else: Validation→400, Unauthorized→401,
//! Forbidden→403, NotFound→404, Conflict→409, everything else→500 with the
//! underlying message surfaced verbatim. No retries, no compensation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fmk_db::StoreError;
use fmk_workflow::TransitionError;
use serde::{Deserialize, Serialize};

/// Success envelope: `{ "data": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBody<T> {
    pub data: T,
}

#[derive(Debug)]
pub enum ApiError {
    /// Request rejected before touching storage (missing/malformed fields,
    /// illegal workflow transition).
    Validation(String),
    /// Missing or invalid bearer token.
    Unauthorized(String),
    /// Capability check refused; `gate` names the failed check.
    Forbidden { gate: &'static str },
    NotFound(&'static str),
    /// A conditional transition lost its race.
    Conflict(String),
    /// Anything else, including all persistence failures.
    Internal(anyhow::Error),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Validation(msg) => write!(f, "validation: {msg}"),
            ApiError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            ApiError::Forbidden { gate } => write!(f, "forbidden: gate {gate} refused"),
            ApiError::NotFound(what) => write!(f, "{what} not found"),
            ApiError::Conflict(msg) => write!(f, "conflict: {msg}"),
            ApiError::Internal(err) => write!(f, "internal: {err:#}"),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Invalid(msg) => ApiError::Validation(msg),
            StoreError::Backend(err) => ApiError::Internal(err),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": msg }),
            ),
            ApiError::Forbidden { gate } => (
                StatusCode::FORBIDDEN,
                serde_json::json!({
                    "error": format!("GATE_REFUSED: role lacks the {gate} capability"),
                    "gate": gate,
                }),
            ),
            ApiError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("{what} not found") }),
            ),
            ApiError::Conflict(msg) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": msg }),
            ),
            ApiError::Internal(err) => {
                tracing::error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": format!("{err:#}") }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
