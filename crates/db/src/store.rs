//! `PostgreSQL` implementation of the ledger store traits.
//!
//! The pair lock is a transaction-scoped advisory lock keyed by a 64-bit hash
//! of `organization_id` and `user_id`, so the first write of a new pair is
//! serialized even though there is no row to lock yet. Chain tails, open pools
//! and balances are additionally read `FOR UPDATE`.

use async_trait::async_trait;
use pointbook_core::ledger::{
    AccountKey, Balance, BalanceStore, CreditPool, CreditPoolStore, EntryFilter, EntryLookup,
    EntryStore, LedgerEntry, PoolFilter, StoreError, Transactional,
};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, SqlErr, Statement,
    TransactionTrait,
};

use crate::convert::{
    balance_from_model, balance_to_active, entry_from_model, entry_to_active, pool_from_model,
    pool_to_active,
};
use crate::repositories::{BalanceRepository, CreditPoolRepository, LedgerEntryRepository};

const PAIR_LOCK_SQL: &str = "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))";

/// Maps a database error to the store error taxonomy.
pub(crate) fn store_err(err: DbErr) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => StoreError::UniqueViolation(detail),
        _ => StoreError::Backend(err.to_string()),
    }
}

/// Ledger store backed by `PostgreSQL` through `SeaORM`.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    db: DatabaseConnection,
}

impl PgLedgerStore {
    /// Wraps an established connection pool.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl Transactional for PgLedgerStore {
    type Tx = DatabaseTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        self.db.begin().await.map_err(store_err)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.commit().await.map_err(store_err)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.rollback().await.map_err(store_err)
    }

    async fn lock_account(&self, tx: &mut Self::Tx, key: &AccountKey) -> Result<(), StoreError> {
        let statement = Statement::from_sql_and_values(
            DbBackend::Postgres,
            PAIR_LOCK_SQL,
            [key.lock_key().into()],
        );
        tx.execute(statement).await.map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl EntryStore for PgLedgerStore {
    async fn find_entries(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        LedgerEntryRepository::find(&self.db, filter)
            .await
            .map_err(store_err)?
            .into_iter()
            .map(entry_from_model)
            .collect()
    }

    async fn count_entries(&self, filter: &EntryFilter) -> Result<u64, StoreError> {
        LedgerEntryRepository::count(&self.db, filter)
            .await
            .map_err(store_err)
    }

    async fn find_entry(&self, lookup: &EntryLookup) -> Result<Option<LedgerEntry>, StoreError> {
        LedgerEntryRepository::find_one(&self.db, lookup)
            .await
            .map_err(store_err)?
            .map(entry_from_model)
            .transpose()
    }

    async fn find_entry_in(
        &self,
        tx: &mut Self::Tx,
        lookup: &EntryLookup,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        LedgerEntryRepository::find_one(&*tx, lookup)
            .await
            .map_err(store_err)?
            .map(entry_from_model)
            .transpose()
    }

    async fn last_entry_for_update(
        &self,
        tx: &mut Self::Tx,
        key: &AccountKey,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        LedgerEntryRepository::last_for_update(&*tx, key)
            .await
            .map_err(store_err)?
            .map(entry_from_model)
            .transpose()
    }

    async fn create_entry(&self, tx: &mut Self::Tx, entry: &LedgerEntry) -> Result<(), StoreError> {
        LedgerEntryRepository::insert(&*tx, entry_to_active(entry)?)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl CreditPoolStore for PgLedgerStore {
    async fn find_credit_pools(&self, filter: &PoolFilter) -> Result<Vec<CreditPool>, StoreError> {
        let pools = CreditPoolRepository::find(&self.db, filter)
            .await
            .map_err(store_err)?;
        Ok(pools.into_iter().map(pool_from_model).collect())
    }

    async fn open_pools_for_update(
        &self,
        tx: &mut Self::Tx,
        key: &AccountKey,
    ) -> Result<Vec<CreditPool>, StoreError> {
        let pools = CreditPoolRepository::open_for_update(&*tx, key)
            .await
            .map_err(store_err)?;
        Ok(pools.into_iter().map(pool_from_model).collect())
    }

    async fn create_credit_pool(&self, tx: &mut Self::Tx, pool: &CreditPool) -> Result<(), StoreError> {
        CreditPoolRepository::insert(&*tx, pool_to_active(pool))
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn update_credit_pool(&self, tx: &mut Self::Tx, pool: &CreditPool) -> Result<(), StoreError> {
        CreditPoolRepository::consume(&*tx, pool.id.into_inner(), pool.remaining, pool.consumed_at)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl BalanceStore for PgLedgerStore {
    async fn find_balance(&self, key: &AccountKey) -> Result<Option<Balance>, StoreError> {
        let balance = BalanceRepository::find(&self.db, key)
            .await
            .map_err(store_err)?;
        Ok(balance.map(balance_from_model))
    }

    async fn find_balance_for_update(
        &self,
        tx: &mut Self::Tx,
        key: &AccountKey,
    ) -> Result<Option<Balance>, StoreError> {
        let balance = BalanceRepository::find_for_update(&*tx, key)
            .await
            .map_err(store_err)?;
        Ok(balance.map(balance_from_model))
    }

    async fn create_balance(&self, tx: &mut Self::Tx, balance: &Balance) -> Result<(), StoreError> {
        BalanceRepository::insert(&*tx, balance_to_active(balance))
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn update_balance(&self, tx: &mut Self::Tx, balance: &Balance) -> Result<(), StoreError> {
        BalanceRepository::set(&*tx, balance.id.into_inner(), balance.balance, balance.updated_at)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
