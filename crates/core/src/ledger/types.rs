//! Engine operation inputs.

use chrono::{DateTime, Utc};
use pointbook_shared::types::{PageRequest, SortOrder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entry::{AccountKey, EntryType};

/// Input for creating a CREDIT or DEBIT entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddEntryInput {
    /// Tenant identifier.
    pub organization_id: String,
    /// User identifier within the tenant.
    pub user_id: String,
    /// CREDIT or DEBIT.
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Positive amount in minor units.
    pub amount: i64,
    /// Client idempotency key.
    pub reference_id: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Caller metadata; `sources` and `reverts` are owned by the engine.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AddEntryInput {
    /// Input with empty description and metadata.
    pub fn new(
        key: &AccountKey,
        entry_type: EntryType,
        amount: i64,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: key.organization_id.clone(),
            user_id: key.user_id.clone(),
            entry_type,
            amount,
            reference_id: reference_id.into(),
            description: String::new(),
            metadata: Map::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the caller metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// The pair this input targets.
    #[must_use]
    pub fn account_key(&self) -> AccountKey {
        AccountKey::new(self.organization_id.clone(), self.user_id.clone())
    }
}

/// Parameters of a ListEntries call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryQuery {
    /// Pair to list.
    pub key: AccountKey,
    /// Only entries of this type.
    pub entry_type: Option<EntryType>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_to: Option<DateTime<Utc>>,
    /// Newest first unless asked otherwise.
    pub order: SortOrder,
    /// Requested page; clamped by the engine.
    pub page: PageRequest,
}

impl EntryQuery {
    /// First page of everything, newest first.
    #[must_use]
    pub fn new(key: AccountKey) -> Self {
        Self {
            key,
            entry_type: None,
            created_from: None,
            created_to: None,
            order: SortOrder::default(),
            page: PageRequest::default(),
        }
    }
}
