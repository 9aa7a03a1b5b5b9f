//! HTTP surface of the tern labeler.
//!
//! Two routers are exposed:
//!
//! - The public XRPC router:
//!   - `GET /xrpc/com.atproto.label.queryLabels` — point-in-time query,
//!     JSON `{"labels": [...]}` of signed records.
//!   - `GET /xrpc/com.atproto.label.subscribeLabels?cursor=N` — WebSocket
//!     upgrade to the framed label stream.
//! - The admin router, meant for a separately bound (and separately
//!   firewalled) listener:
//!   - `POST /label` — submit one JSON label. 201 on admission, 200 on
//!     no-op, 400 on rejection. No authentication of its own.
//!   - `GET /metrics` — Prometheus text exposition.

mod admin;
mod error;
mod query;
mod subscribe;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tern_engine::Labeler;

pub use error::ServerError;

/// Shared state for all handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub labeler: Arc<Labeler>,
}

/// The labeler's public HTTP server.
pub struct LabelerServer {
    router: Router,
}

impl LabelerServer {
    /// Build the public XRPC router around a labeler.
    pub fn new(labeler: Arc<Labeler>) -> Self {
        let state = AppState { labeler };
        let router = Router::new()
            .route(
                "/xrpc/com.atproto.label.queryLabels",
                get(query::query_labels),
            )
            .route(
                "/xrpc/com.atproto.label.subscribeLabels",
                get(subscribe::subscribe_labels),
            )
            .with_state(state);
        Self { router }
    }

    /// Build the admin router (label ingress + metrics).
    pub fn admin_router(labeler: Arc<Labeler>) -> Router {
        let state = AppState { labeler };
        Router::new()
            .route("/label", post(admin::add_label))
            .route("/metrics", get(admin::metrics))
            .with_state(state)
    }

    /// Return the inner [`Router`] (useful for testing with
    /// `tower::ServiceExt`).
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve the XRPC API on the given TCP address.
    pub async fn serve(self, addr: &str) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, "labeler XRPC server listening");
        axum::serve(listener, self.router).await
    }

    /// Serve with graceful shutdown triggered by the given future: the
    /// server stops accepting new connections and drains in-flight
    /// requests (open subscriptions are dropped).
    pub async fn serve_with_shutdown(
        self,
        addr: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, "labeler XRPC server listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
