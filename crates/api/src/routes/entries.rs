//! Ledger entry routes.

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use pointbook_core::ledger::{AccountKey, AddEntryInput, EntryQuery, EntryType, LedgerStore};
use pointbook_shared::types::{LedgerEntryId, PageRequest, SortOrder};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{AppState, error::ApiError};

/// Creates the ledger entry routes.
pub fn routes<S: LedgerStore>() -> Router<AppState<S>> {
    Router::new()
        .route(
            "/organizations/{org_id}/users/{user_id}/entries",
            post(add_entry::<S>).get(list_entries::<S>),
        )
        .route("/entries/{entry_id}", get(get_entry::<S>))
        .route("/entries/{entry_id}/revert", post(revert_entry::<S>))
}

// ============================================================================
// Request Types
// ============================================================================

/// Request body for appending an entry.
#[derive(Debug, Deserialize)]
pub struct CreateEntryRequest {
    /// CREDIT or DEBIT.
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Positive amount in minor units.
    pub amount: i64,
    /// Client idempotency key.
    pub reference_id: String,
    /// Optional description.
    #[serde(default)]
    pub description: String,
    /// Optional caller metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Query parameters for listing entries.
#[derive(Debug, Default, Deserialize)]
pub struct ListEntriesQuery {
    /// Filter by entry type.
    #[serde(rename = "type")]
    pub entry_type: Option<EntryType>,
    /// Inclusive lower bound on creation time (RFC 3339).
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on creation time (RFC 3339).
    pub to: Option<DateTime<Utc>>,
    /// `asc` or `desc` (default).
    pub order: Option<SortOrder>,
    /// Page number (1-indexed).
    pub page: Option<u32>,
    /// Page size, capped by the engine.
    pub per_page: Option<u32>,
}

impl ListEntriesQuery {
    fn into_entry_query(self, key: AccountKey) -> EntryQuery {
        let defaults = PageRequest::default();
        EntryQuery {
            key,
            entry_type: self.entry_type,
            created_from: self.from,
            created_to: self.to,
            order: self.order.unwrap_or_default(),
            page: PageRequest::new(
                self.page.unwrap_or(defaults.page),
                self.per_page.unwrap_or(defaults.per_page),
            ),
        }
    }
}

fn parse_entry_id(raw: &str) -> Result<LedgerEntryId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::invalid_argument(format!("invalid entry id: {raw}")))
}

// ============================================================================
// Route Handlers
// ============================================================================

/// POST `/organizations/{org_id}/users/{user_id}/entries` - Append a CREDIT or DEBIT.
async fn add_entry<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path((org_id, user_id)): Path<(String, String)>,
    payload: Result<Json<CreateEntryRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };

    let key = AccountKey::new(org_id, user_id);
    let input = AddEntryInput::new(&key, payload.entry_type, payload.amount, payload.reference_id)
        .with_description(payload.description)
        .with_metadata(payload.metadata);

    match state.engine.add_entry(input).await {
        Ok(entry) => (StatusCode::CREATED, Json(entry)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET `/organizations/{org_id}/users/{user_id}/entries` - One page of a pair's entries.
async fn list_entries<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path((org_id, user_id)): Path<(String, String)>,
    query: Result<Query<ListEntriesQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };

    let query = query.into_entry_query(AccountKey::new(org_id, user_id));
    match state.engine.list_entries(query).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET `/entries/{entry_id}` - A single entry.
async fn get_entry<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(entry_id): Path<String>,
) -> Response {
    let entry_id = match parse_entry_id(&entry_id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    match state.engine.get_entry(entry_id).await {
        Ok(entry) => (StatusCode::OK, Json(entry)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST `/entries/{entry_id}/revert` - Append a reversal; returns the original entry.
async fn revert_entry<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(entry_id): Path<String>,
) -> Response {
    let entry_id = match parse_entry_id(&entry_id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    match state.engine.revert_entry(entry_id).await {
        Ok(original) => (StatusCode::OK, Json(original)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
