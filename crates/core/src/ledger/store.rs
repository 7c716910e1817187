//! Store contracts the engine runs against.
//!
//! Each entity gets its own trait. Reads that take part in a mutation go
//! through the store's transaction handle so the backend can hold row locks
//! until commit; plain reads run without locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pointbook_shared::types::{LedgerEntryId, PageRequest, SortOrder};
use thiserror::Error;

use super::allocation::CreditPool;
use super::balance::Balance;
use super::entry::{AccountKey, EntryType, LedgerEntry};

/// Errors raised by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The backend failed (connection, query, lock, integrity rule).
    #[error("backend failure: {0}")]
    Backend(String),

    /// A stored value could not be decoded.
    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// How to find a single entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryLookup {
    /// By primary key.
    Id(LedgerEntryId),
    /// By idempotency key within an organization.
    Reference {
        /// Organization scope.
        organization_id: String,
        /// Client reference id.
        reference_id: String,
    },
}

impl EntryLookup {
    /// Lookup by `(organization_id, reference_id)`.
    pub fn reference(organization_id: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self::Reference {
            organization_id: organization_id.into(),
            reference_id: reference_id.into(),
        }
    }

    /// True when `entry` is the one this lookup names.
    #[must_use]
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        match self {
            Self::Id(id) => entry.id == *id,
            Self::Reference {
                organization_id,
                reference_id,
            } => entry.organization_id == *organization_id && entry.reference_id == *reference_id,
        }
    }
}

/// Entry listing filter, always scoped to one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFilter {
    /// Owning pair.
    pub key: AccountKey,
    /// Only entries of this type.
    pub entry_type: Option<EntryType>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_to: Option<DateTime<Utc>>,
    /// Direction over `(created_at, id)`.
    pub order: SortOrder,
    /// `None` returns every match.
    pub page: Option<PageRequest>,
}

impl EntryFilter {
    /// Every entry of the pair, oldest first: the order the chain is built in.
    #[must_use]
    pub fn chain(key: AccountKey) -> Self {
        Self {
            key,
            entry_type: None,
            created_from: None,
            created_to: None,
            order: SortOrder::Asc,
            page: None,
        }
    }

    /// True when `entry` passes every predicate (paging aside).
    #[must_use]
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        entry.organization_id == self.key.organization_id
            && entry.user_id == self.key.user_id
            && self.entry_type.is_none_or(|t| entry.entry_type == t)
            && self.created_from.is_none_or(|from| entry.created_at >= from)
            && self.created_to.is_none_or(|to| entry.created_at <= to)
    }
}

/// Credit pool listing filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolFilter {
    /// Owning pair.
    pub key: AccountKey,
    /// Skip pools with nothing left.
    pub open_only: bool,
}

impl PoolFilter {
    /// Every pool of the pair.
    #[must_use]
    pub const fn all(key: AccountKey) -> Self {
        Self {
            key,
            open_only: false,
        }
    }
}

/// Transaction lifecycle shared by every entity store.
#[async_trait]
pub trait Transactional: Send + Sync {
    /// Handle for one atomic unit of work. Dropping it rolls back.
    type Tx: Send;

    /// Starts a transaction.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Makes every write of `tx` visible at once.
    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    /// Discards every write of `tx`.
    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;

    /// Takes the exclusive per-pair lock for the rest of `tx`.
    ///
    /// Must be acquired before any row lock of the pair.
    async fn lock_account(&self, tx: &mut Self::Tx, key: &AccountKey) -> Result<(), StoreError>;
}

/// Ledger entry persistence.
#[async_trait]
pub trait EntryStore: Transactional {
    /// Matching entries ordered by `(created_at, id)` in `filter.order`.
    async fn find_entries(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Number of matches, ignoring paging.
    async fn count_entries(&self, filter: &EntryFilter) -> Result<u64, StoreError>;

    /// Single entry lookup.
    async fn find_entry(&self, lookup: &EntryLookup) -> Result<Option<LedgerEntry>, StoreError>;

    /// Single entry lookup inside `tx`, seeing its own writes.
    async fn find_entry_in(
        &self,
        tx: &mut Self::Tx,
        lookup: &EntryLookup,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// The chain tail of the pair, locked for the rest of `tx`.
    async fn last_entry_for_update(
        &self,
        tx: &mut Self::Tx,
        key: &AccountKey,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// Appends an entry.
    async fn create_entry(&self, tx: &mut Self::Tx, entry: &LedgerEntry) -> Result<(), StoreError>;
}

/// Credit pool persistence.
#[async_trait]
pub trait CreditPoolStore: Transactional {
    /// Matching pools ordered by `(created_at, id)` ascending.
    async fn find_credit_pools(&self, filter: &PoolFilter) -> Result<Vec<CreditPool>, StoreError>;

    /// Open pools of the pair, oldest first, locked for the rest of `tx`.
    async fn open_pools_for_update(
        &self,
        tx: &mut Self::Tx,
        key: &AccountKey,
    ) -> Result<Vec<CreditPool>, StoreError>;

    /// Inserts a pool.
    async fn create_credit_pool(&self, tx: &mut Self::Tx, pool: &CreditPool) -> Result<(), StoreError>;

    /// Writes `remaining` and `consumed_at` of an existing pool.
    async fn update_credit_pool(&self, tx: &mut Self::Tx, pool: &CreditPool) -> Result<(), StoreError>;
}

/// Balance persistence.
#[async_trait]
pub trait BalanceStore: Transactional {
    /// The pair's balance row, if any.
    async fn find_balance(&self, key: &AccountKey) -> Result<Option<Balance>, StoreError>;

    /// The pair's balance row, locked for the rest of `tx`.
    async fn find_balance_for_update(
        &self,
        tx: &mut Self::Tx,
        key: &AccountKey,
    ) -> Result<Option<Balance>, StoreError>;

    /// Inserts the pair's balance row.
    async fn create_balance(&self, tx: &mut Self::Tx, balance: &Balance) -> Result<(), StoreError>;

    /// Writes `balance` and `updated_at` of an existing row.
    async fn update_balance(&self, tx: &mut Self::Tx, balance: &Balance) -> Result<(), StoreError>;
}

/// Everything the engine needs from a backend.
pub trait LedgerStore: EntryStore + CreditPoolStore + BalanceStore + 'static {}

impl<T> LedgerStore for T where T: EntryStore + CreditPoolStore + BalanceStore + 'static {}
