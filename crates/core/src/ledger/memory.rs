//! In-process ledger store.
//!
//! Honours the same contract as the PostgreSQL store: a per-pair async mutex
//! plays the advisory lock, writes are staged on the transaction handle and
//! applied under one write lock at commit, and dropping the handle discards
//! them. The unique and append-only rules of the schema are checked here too.
//!
//! This is a test and development backend. Nothing is persisted, and the
//! lock table keeps one mutex for every pair ever locked for the life of the
//! store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use pointbook_shared::types::{CreditPoolId, SortOrder};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::allocation::CreditPool;
use super::balance::Balance;
use super::entry::{AccountKey, LedgerEntry};
use super::store::{
    BalanceStore, CreditPoolStore, EntryFilter, EntryLookup, EntryStore, PoolFilter, StoreError,
    Transactional,
};

const REFERENCE_CONSTRAINT: &str = "ledger_entries_organization_id_reference_id_key";
const BALANCE_CONSTRAINT: &str = "balances_organization_id_user_id_key";
const POOL_CONSTRAINT: &str = "credit_pools_ledger_entry_id_key";

#[derive(Debug, Default)]
struct State {
    entries: Vec<LedgerEntry>,
    pools: Vec<CreditPool>,
    balances: HashMap<AccountKey, Balance>,
}

impl State {
    fn has_reference(&self, organization_id: &str, reference_id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.organization_id == organization_id && e.reference_id == reference_id)
    }
}

/// Ledger store kept in process memory. Cloning shares the data.
///
/// Meant for tests and local development: pair locks are never evicted, so
/// memory grows with the number of distinct pairs touched.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<State>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Transaction handle of [`InMemoryLedgerStore`].
#[derive(Debug, Default)]
pub struct MemoryTx {
    locks: Vec<(String, OwnedMutexGuard<()>)>,
    entries: Vec<LedgerEntry>,
    new_pools: Vec<CreditPool>,
    pool_updates: BTreeMap<CreditPoolId, CreditPool>,
    new_balances: HashMap<AccountKey, Balance>,
    balance_updates: HashMap<AccountKey, Balance>,
}

impl MemoryTx {
    fn holds(&self, lock_key: &str) -> bool {
        self.locks.iter().any(|(held, _)| held == lock_key)
    }

    fn ensure_locked(&self, key: &AccountKey) -> Result<(), StoreError> {
        if self.holds(&key.lock_key()) {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("pair lock for {key} is not held")))
        }
    }
}

impl InMemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pair locks created so far.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Replaces a committed entry in place, bypassing the append-only rule.
    ///
    /// Simulates storage-level tampering so chain verification can be
    /// exercised; the engine never calls it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if no entry has the same id.
    pub fn replace_entry_unchecked(&self, entry: LedgerEntry) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let slot = state
            .entries
            .iter_mut()
            .find(|e| e.id == entry.id)
            .ok_or_else(|| StoreError::Backend(format!("ledger entry {} not found", entry.id)))?;
        *slot = entry;
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("memory store state poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("memory store state poisoned".into()))
    }

    /// Committed pools of `key` with the staged updates of `tx` laid over them.
    fn pools_seen_by(&self, tx: &MemoryTx, key: &AccountKey) -> Result<Vec<CreditPool>, StoreError> {
        let state = self.read()?;
        let mut pools: Vec<CreditPool> = state
            .pools
            .iter()
            .filter(|p| p.organization_id == key.organization_id && p.user_id == key.user_id)
            .map(|p| tx.pool_updates.get(&p.id).unwrap_or(p).clone())
            .collect();
        pools.extend(
            tx.new_pools
                .iter()
                .filter(|p| p.organization_id == key.organization_id && p.user_id == key.user_id)
                .cloned(),
        );
        sort_pools(&mut pools);
        Ok(pools)
    }
}

fn sort_entries(entries: &mut [LedgerEntry], order: SortOrder) {
    entries.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    if order == SortOrder::Desc {
        entries.reverse();
    }
}

fn sort_pools(pools: &mut [CreditPool]) {
    pools.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
}

fn same_pair(entry: &LedgerEntry, key: &AccountKey) -> bool {
    entry.organization_id == key.organization_id && entry.user_id == key.user_id
}

#[async_trait]
impl Transactional for InMemoryLedgerStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        Ok(MemoryTx::default())
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), StoreError> {
        let mut state = self.write()?;

        // Reference ids are unique per organization, and other pairs of the
        // same organization do not share our lock.
        for entry in &tx.entries {
            if state.has_reference(&entry.organization_id, &entry.reference_id) {
                return Err(StoreError::UniqueViolation(REFERENCE_CONSTRAINT.into()));
            }
        }
        for key in tx.new_balances.keys() {
            if state.balances.contains_key(key) {
                return Err(StoreError::UniqueViolation(BALANCE_CONSTRAINT.into()));
            }
        }
        for update in tx.pool_updates.values() {
            let current = state
                .pools
                .iter()
                .find(|p| p.id == update.id)
                .ok_or_else(|| StoreError::Backend(format!("credit pool {} not found", update.id)))?;
            if update.remaining < 0 || update.remaining > current.remaining {
                return Err(StoreError::Backend(format!(
                    "credit pool {} remaining may only decrease",
                    update.id
                )));
            }
        }

        let MemoryTx {
            locks,
            entries,
            new_pools,
            pool_updates,
            new_balances,
            balance_updates,
        } = tx;

        state.entries.extend(entries);
        for pool in &mut state.pools {
            if let Some(update) = pool_updates.get(&pool.id) {
                pool.clone_from(update);
            }
        }
        state.pools.extend(new_pools);
        state.balances.extend(new_balances);
        state.balances.extend(balance_updates);

        drop(state);
        drop(locks);
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<(), StoreError> {
        drop(tx);
        Ok(())
    }

    async fn lock_account(&self, tx: &mut MemoryTx, key: &AccountKey) -> Result<(), StoreError> {
        let lock_key = key.lock_key();
        if tx.holds(&lock_key) {
            return Ok(());
        }
        let mutex = Arc::clone(&self.locks.entry(lock_key.clone()).or_default());
        let guard = mutex.lock_owned().await;
        tx.locks.push((lock_key, guard));
        Ok(())
    }
}

#[async_trait]
impl EntryStore for InMemoryLedgerStore {
    async fn find_entries(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut found: Vec<LedgerEntry> = self
            .read()?
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        sort_entries(&mut found, filter.order);

        if let Some(page) = filter.page {
            let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
            let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);
            found = found.into_iter().skip(offset).take(limit).collect();
        }
        Ok(found)
    }

    async fn count_entries(&self, filter: &EntryFilter) -> Result<u64, StoreError> {
        let count = self.read()?.entries.iter().filter(|e| filter.matches(e)).count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn find_entry(&self, lookup: &EntryLookup) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.read()?.entries.iter().find(|e| lookup.matches(e)).cloned())
    }

    async fn find_entry_in(
        &self,
        tx: &mut MemoryTx,
        lookup: &EntryLookup,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        if let Some(staged) = tx.entries.iter().find(|e| lookup.matches(e)) {
            return Ok(Some(staged.clone()));
        }
        self.find_entry(lookup).await
    }

    async fn last_entry_for_update(
        &self,
        tx: &mut MemoryTx,
        key: &AccountKey,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        tx.ensure_locked(key)?;
        let state = self.read()?;
        let tail = state
            .entries
            .iter()
            .chain(tx.entries.iter())
            .filter(|e| same_pair(e, key))
            .max_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)))
            .cloned();
        Ok(tail)
    }

    async fn create_entry(&self, tx: &mut MemoryTx, entry: &LedgerEntry) -> Result<(), StoreError> {
        tx.ensure_locked(&entry.account_key())?;
        let staged_duplicate = tx.entries.iter().any(|e| {
            e.organization_id == entry.organization_id && e.reference_id == entry.reference_id
        });
        if staged_duplicate || self.read()?.has_reference(&entry.organization_id, &entry.reference_id) {
            return Err(StoreError::UniqueViolation(REFERENCE_CONSTRAINT.into()));
        }
        tx.entries.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl CreditPoolStore for InMemoryLedgerStore {
    async fn find_credit_pools(&self, filter: &PoolFilter) -> Result<Vec<CreditPool>, StoreError> {
        let mut pools: Vec<CreditPool> = self
            .read()?
            .pools
            .iter()
            .filter(|p| {
                p.organization_id == filter.key.organization_id
                    && p.user_id == filter.key.user_id
                    && (!filter.open_only || p.is_open())
            })
            .cloned()
            .collect();
        sort_pools(&mut pools);
        Ok(pools)
    }

    async fn open_pools_for_update(
        &self,
        tx: &mut MemoryTx,
        key: &AccountKey,
    ) -> Result<Vec<CreditPool>, StoreError> {
        tx.ensure_locked(key)?;
        let mut pools = self.pools_seen_by(tx, key)?;
        pools.retain(CreditPool::is_open);
        Ok(pools)
    }

    async fn create_credit_pool(&self, tx: &mut MemoryTx, pool: &CreditPool) -> Result<(), StoreError> {
        tx.ensure_locked(&AccountKey::new(pool.organization_id.clone(), pool.user_id.clone()))?;
        let duplicate = tx
            .new_pools
            .iter()
            .any(|p| p.ledger_entry_id == pool.ledger_entry_id)
            || self
                .read()?
                .pools
                .iter()
                .any(|p| p.ledger_entry_id == pool.ledger_entry_id);
        if duplicate {
            return Err(StoreError::UniqueViolation(POOL_CONSTRAINT.into()));
        }
        tx.new_pools.push(pool.clone());
        Ok(())
    }

    async fn update_credit_pool(&self, tx: &mut MemoryTx, pool: &CreditPool) -> Result<(), StoreError> {
        tx.ensure_locked(&AccountKey::new(pool.organization_id.clone(), pool.user_id.clone()))?;
        if let Some(staged) = tx.new_pools.iter_mut().find(|p| p.id == pool.id) {
            staged.clone_from(pool);
            return Ok(());
        }
        if !self.read()?.pools.iter().any(|p| p.id == pool.id) {
            return Err(StoreError::Backend(format!("credit pool {} not found", pool.id)));
        }
        tx.pool_updates.insert(pool.id, pool.clone());
        Ok(())
    }
}

#[async_trait]
impl BalanceStore for InMemoryLedgerStore {
    async fn find_balance(&self, key: &AccountKey) -> Result<Option<Balance>, StoreError> {
        Ok(self.read()?.balances.get(key).cloned())
    }

    async fn find_balance_for_update(
        &self,
        tx: &mut MemoryTx,
        key: &AccountKey,
    ) -> Result<Option<Balance>, StoreError> {
        tx.ensure_locked(key)?;
        if let Some(staged) = tx.balance_updates.get(key).or_else(|| tx.new_balances.get(key)) {
            return Ok(Some(staged.clone()));
        }
        self.find_balance(key).await
    }

    async fn create_balance(&self, tx: &mut MemoryTx, balance: &Balance) -> Result<(), StoreError> {
        let key = AccountKey::new(balance.organization_id.clone(), balance.user_id.clone());
        tx.ensure_locked(&key)?;
        if tx.new_balances.contains_key(&key) || self.read()?.balances.contains_key(&key) {
            return Err(StoreError::UniqueViolation(BALANCE_CONSTRAINT.into()));
        }
        tx.new_balances.insert(key, balance.clone());
        Ok(())
    }

    async fn update_balance(&self, tx: &mut MemoryTx, balance: &Balance) -> Result<(), StoreError> {
        let key = AccountKey::new(balance.organization_id.clone(), balance.user_id.clone());
        tx.ensure_locked(&key)?;
        if let Some(staged) = tx.new_balances.get_mut(&key) {
            staged.clone_from(balance);
            return Ok(());
        }
        if !self.read()?.balances.contains_key(&key) {
            return Err(StoreError::Backend(format!("balance for {key} not found")));
        }
        tx.balance_updates.insert(key, balance.clone());
        Ok(())
    }
}
