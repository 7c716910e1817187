//! Per-pair read routes: balance, chain verification and reconciliation.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use pointbook_core::ledger::{AccountKey, LedgerStore};

use crate::{AppState, error::ApiError};

/// Creates the per-pair routes.
pub fn routes<S: LedgerStore>() -> Router<AppState<S>> {
    Router::new()
        .route(
            "/organizations/{org_id}/users/{user_id}/balance",
            get(get_balance::<S>),
        )
        .route(
            "/organizations/{org_id}/users/{user_id}/chain/verify",
            get(verify_chain::<S>),
        )
        .route(
            "/organizations/{org_id}/users/{user_id}/reconciliation",
            get(reconcile::<S>),
        )
}

/// GET `/organizations/{org_id}/users/{user_id}/balance`
async fn get_balance<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path((org_id, user_id)): Path<(String, String)>,
) -> Response {
    match state.engine.get_balance(&AccountKey::new(org_id, user_id)).await {
        Ok(balance) => (StatusCode::OK, Json(balance)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET `/organizations/{org_id}/users/{user_id}/chain/verify`
///
/// A broken chain is still a 200; the report carries the break.
async fn verify_chain<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path((org_id, user_id)): Path<(String, String)>,
) -> Response {
    match state.engine.verify_chain(&AccountKey::new(org_id, user_id)).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET `/organizations/{org_id}/users/{user_id}/reconciliation`
async fn reconcile<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path((org_id, user_id)): Path<(String, String)>,
) -> Response {
    match state.engine.reconcile(&AccountKey::new(org_id, user_id)).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
