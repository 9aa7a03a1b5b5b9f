//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use tern_engine::LabelerError;

/// Status code for unsupported query patterns. Not a registered HTTP
/// status; the external contract pins the number.
const UNSUPPORTED_PATTERN: u16 = 448;

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Labeler(#[from] LabelerError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let Self::Labeler(err) = self;
        let status = match &err {
            LabelerError::Validation(_) => StatusCode::BAD_REQUEST,
            LabelerError::UnsupportedPattern(_) => {
                StatusCode::from_u16(UNSUPPORTED_PATTERN).unwrap()
            }
            LabelerError::Conflict | LabelerError::Store(_) | LabelerError::Codec(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = match status {
            // Don't leak internals to the caller.
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(%err, "internal error");
                "internal error".to_string()
            }
            _ => err.to_string(),
        };
        (status, body).into_response()
    }
}
