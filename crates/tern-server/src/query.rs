//! `com.atproto.label.queryLabels` handler.

use axum::Json;
use axum::extract::{RawQuery, State};
use serde::Serialize;
use tern_engine::QueryRequest;
use tern_types::Label;

use crate::AppState;
use crate::error::ServerError;

/// Response body: the signed records visible for the requested subjects.
#[derive(Serialize)]
pub(crate) struct QueryResponse {
    pub labels: Vec<Label>,
}

/// `GET /xrpc/com.atproto.label.queryLabels?uriPatterns=...&sources=...`
///
/// `uriPatterns` and `sources` repeat; `cursor` and `limit` are accepted
/// and ignored.
pub(crate) async fn query_labels(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Json<QueryResponse>, ServerError> {
    let request = parse_query(raw.as_deref().unwrap_or(""));
    let labels = state.labeler.query(&request)?;
    Ok(Json(QueryResponse { labels }))
}

/// Collect the repeated query parameters. Unknown keys are ignored, like
/// any other XRPC endpoint would.
fn parse_query(raw: &str) -> QueryRequest {
    let mut request = QueryRequest::default();
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        match key.as_ref() {
            "uriPatterns" => request.uri_patterns.push(value.into_owned()),
            "sources" => request.sources.push(value.into_owned()),
            _ => {}
        }
    }
    request
}
