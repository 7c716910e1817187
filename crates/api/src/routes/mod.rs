//! API route definitions.

use axum::Router;
use pointbook_core::ledger::LedgerStore;

use crate::AppState;

pub mod accounts;
pub mod entries;
pub mod health;

/// Creates the API router with all routes.
pub fn api_routes<S: LedgerStore>() -> Router<AppState<S>> {
    Router::new()
        .merge(health::routes())
        .merge(entries::routes())
        .merge(accounts::routes())
}
