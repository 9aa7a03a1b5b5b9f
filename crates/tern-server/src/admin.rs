//! Admin ingress: label submission and metrics.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tern_engine::LabelerError;
use tern_types::Label;

use crate::AppState;

/// `POST /label` — submit one partially populated JSON label.
///
/// 201 when the label changed the effective state, 200 when it was a
/// no-op, 400 when it was rejected. There is no authentication here;
/// deployments bind the admin router to a restricted address.
pub(crate) async fn add_label(
    State(state): State<AppState>,
    Json(label): Json<Label>,
) -> axum::response::Response {
    match state.labeler.add_label(label) {
        Ok(true) => (StatusCode::CREATED, "OK").into_response(),
        Ok(false) => (StatusCode::OK, "OK").into_response(),
        Err(err @ (LabelerError::Validation(_) | LabelerError::UnsupportedPattern(_))) => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        Err(err) => {
            tracing::error!(%err, "label write failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// `GET /metrics` — Prometheus text exposition.
pub(crate) async fn metrics(State(state): State<AppState>) -> axum::response::Response {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.labeler.metrics().render(),
    )
        .into_response()
}
