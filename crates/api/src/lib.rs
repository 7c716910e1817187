//! HTTP API layer with Axum routes.
//!
//! This crate provides:
//! - REST routes over the ledger engine
//! - JSON error responses with stable codes

pub mod error;
pub mod routes;

use axum::Router;
use pointbook_core::ledger::{LedgerEngine, LedgerStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
pub struct AppState<S: LedgerStore> {
    /// Ledger engine over the configured store.
    pub engine: LedgerEngine<S>,
}

impl<S: LedgerStore> AppState<S> {
    /// Wraps an engine.
    #[must_use]
    pub const fn new(engine: LedgerEngine<S>) -> Self {
        Self { engine }
    }
}

impl<S: LedgerStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

/// Creates the main application router.
pub fn create_router<S: LedgerStore>(state: AppState<S>) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
