//! The ledger engine.
//!
//! Every mutation runs in one store transaction scoped to a single
//! (organization, user) pair and takes its locks in a fixed order:
//!
//! 1. the pair lock,
//! 2. the chain tail row,
//! 3. the balance row,
//! 4. the open credit pools, oldest first (DEBIT only).
//!
//! Opening the transaction, lock waits and staged writes share one deadline
//! of `operation_timeout`. The duplicate pre-check and the read-back after
//! commit are plain reads outside it. Commit runs after the deadline has been
//! checked, so a timeout always means nothing was written.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use pointbook_shared::LedgerConfig;
use pointbook_shared::types::{LedgerEntryId, PageResponse};
use tokio::time::{Instant, error::Elapsed, timeout_at};

use super::allocation::{Allocation, CreditPool, allocate_fifo};
use super::balance::{Balance, BalanceSnapshot};
use super::chain::{self, ChainVerification};
use super::codec::{self, GENESIS_HASH};
use super::entry::{AccountKey, EntryDraft, EntryMetadata, EntryType, LedgerEntry, RevertLink};
use super::error::LedgerError;
use super::observer::{LedgerEvent, LedgerObserver, Operation, TracingObserver};
use super::replay::{self, Reconciliation};
use super::store::{EntryFilter, EntryLookup, LedgerStore, PoolFilter, StoreError};
use super::types::{AddEntryInput, EntryQuery};
use super::validation;

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deadline for lock waits and staged work of one mutation.
    pub operation_timeout: Duration,
    /// Largest page a listing returns.
    pub max_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&LedgerConfig::default())
    }
}

impl From<&LedgerConfig> for EngineConfig {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            operation_timeout: config.operation_timeout(),
            max_page_size: config.max_page_size,
        }
    }
}

/// Orchestrates ledger operations over a [`LedgerStore`].
pub struct LedgerEngine<S> {
    store: Arc<S>,
    observer: Arc<dyn LedgerObserver>,
    config: EngineConfig,
}

impl<S> Clone for LedgerEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            observer: Arc::clone(&self.observer),
            config: self.config,
        }
    }
}

impl<S: LedgerStore> LedgerEngine<S> {
    /// Creates an engine with default config and the tracing observer.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            observer: Arc::new(TracingObserver),
            config: EngineConfig::default(),
        }
    }

    /// Replaces the config.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn LedgerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Current config.
    #[must_use]
    pub const fn config(&self) -> EngineConfig {
        self.config
    }

    /// Appends a CREDIT or DEBIT entry and updates pools and balance.
    ///
    /// Returns the committed entry as read back from the store.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for bad input, `AlreadyExists` when the reference id
    /// is taken in the organization, `InsufficientFunds` when a debit cannot
    /// be covered, and internal-kind errors for store faults and timeouts.
    pub async fn add_entry(&self, input: AddEntryInput) -> Result<LedgerEntry, LedgerError> {
        let result = self.try_add_entry(input).await;
        match &result {
            Ok(entry) => self.observer.on_event(&LedgerEvent::EntryAdded { entry }),
            Err(error) => self.failed(Operation::AddEntry, error),
        }
        result
    }

    /// Appends a reversal of `entry_id` and returns the original entry.
    ///
    /// The reversal links to the true chain tail and records the reverted
    /// entry in its metadata. The balance drops by the original amount
    /// whatever its type; credit pools are left untouched.
    ///
    /// # Errors
    ///
    /// `NotFound` when the entry or the pair's balance is missing,
    /// `AlreadyExists` when the entry was already reverted, and
    /// internal-kind errors for store faults and timeouts.
    pub async fn revert_entry(&self, entry_id: LedgerEntryId) -> Result<LedgerEntry, LedgerError> {
        match self.try_revert_entry(entry_id).await {
            Ok((original, reversal)) => {
                self.observer.on_event(&LedgerEvent::EntryReverted {
                    original: &original,
                    reversal: &reversal,
                });
                Ok(original)
            }
            Err(error) => {
                self.failed(Operation::RevertEntry, &error);
                Err(error)
            }
        }
    }

    /// One page of a pair's entries.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for blank ids or an inverted range.
    pub async fn list_entries(&self, query: EntryQuery) -> Result<PageResponse<LedgerEntry>, LedgerError> {
        let result = self.try_list_entries(query).await;
        self.observe(Operation::ListEntries, result)
    }

    /// A single entry by id.
    ///
    /// # Errors
    ///
    /// `NotFound` when no entry has this id.
    pub async fn get_entry(&self, entry_id: LedgerEntryId) -> Result<LedgerEntry, LedgerError> {
        let result = async {
            self.store
                .find_entry(&EntryLookup::Id(entry_id))
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("ledger entry {entry_id}")))
        }
        .await;
        self.observe(Operation::GetEntry, result)
    }

    /// The pair's balance; zero when it never received a credit.
    ///
    /// # Errors
    ///
    /// Internal-kind errors only.
    pub async fn get_balance(&self, key: &AccountKey) -> Result<BalanceSnapshot, LedgerError> {
        let result = self
            .store
            .find_balance(key)
            .await
            .map(|balance| {
                balance
                    .as_ref()
                    .map_or_else(|| BalanceSnapshot::empty(key), Balance::snapshot)
            })
            .map_err(LedgerError::from);
        self.observe(Operation::GetBalance, result)
    }

    /// Walks the pair's chain and reports the first break, if any.
    ///
    /// # Errors
    ///
    /// Internal-kind errors only; a broken chain is a report, not an error.
    pub async fn verify_chain(&self, key: &AccountKey) -> Result<ChainVerification, LedgerError> {
        match self.store.find_entries(&EntryFilter::chain(key.clone())).await {
            Ok(entries) => {
                let report = chain::verify_chain(&entries);
                self.observer.on_event(&LedgerEvent::ChainVerified {
                    key,
                    report: &report,
                });
                Ok(report)
            }
            Err(err) => self.observe(Operation::VerifyChain, Err(err.into())),
        }
    }

    /// Replays the pair's entries and compares them with stored pools and balance.
    ///
    /// # Errors
    ///
    /// Internal-kind errors only.
    pub async fn reconcile(&self, key: &AccountKey) -> Result<Reconciliation, LedgerError> {
        let result = async {
            let entries = self.store.find_entries(&EntryFilter::chain(key.clone())).await?;
            let pools = self
                .store
                .find_credit_pools(&PoolFilter::all(key.clone()))
                .await?;
            let balance = self.store.find_balance(key).await?;
            Ok::<_, LedgerError>(replay::reconcile(key, &entries, &pools, balance.as_ref()))
        }
        .await;
        self.observe(Operation::Reconcile, result)
    }

    // ========== AddEntry ==========

    async fn try_add_entry(&self, input: AddEntryInput) -> Result<LedgerEntry, LedgerError> {
        validation::validate_add_entry(&input)?;

        let key = input.account_key();
        let lookup = EntryLookup::reference(&input.organization_id, &input.reference_id);
        if self.store.find_entry(&lookup).await?.is_some() {
            return Err(already_exists(&input.organization_id, &input.reference_id));
        }

        let transaction_id = codec::generate_transaction_id()?;

        let deadline = self.deadline();
        let mut tx = self.begin(deadline).await?;
        let staged = timeout_at(
            deadline,
            self.stage_add_entry(&mut tx, &key, &lookup, &input, transaction_id),
        )
        .await;
        self.settle(tx, staged)
            .await
            .map_err(|err| reference_conflict(err, &input.organization_id, &input.reference_id))?;

        self.store.find_entry(&lookup).await?.ok_or_else(|| {
            LedgerError::Internal(format!(
                "entry {} vanished after commit",
                input.reference_id
            ))
        })
    }

    async fn stage_add_entry(
        &self,
        tx: &mut S::Tx,
        key: &AccountKey,
        lookup: &EntryLookup,
        input: &AddEntryInput,
        transaction_id: String,
    ) -> Result<LedgerEntry, LedgerError> {
        self.store.lock_account(tx, key).await?;
        if self.store.find_entry_in(tx, lookup).await?.is_some() {
            return Err(already_exists(&input.organization_id, &input.reference_id));
        }

        let tail = self.store.last_entry_for_update(tx, key).await?;
        let balance = self.store.find_balance_for_update(tx, key).await?;

        let draft = EntryDraft {
            id: LedgerEntryId::new(),
            key: key.clone(),
            entry_type: input.entry_type,
            amount: input.amount,
            transaction_id,
            reference_id: input.reference_id.clone(),
            description: input.description.clone(),
            metadata: EntryMetadata::from_caller(input.metadata.clone())?,
            created_at: next_timestamp(tail.as_ref()),
            previous_hash: tail.map_or_else(|| GENESIS_HASH.to_string(), |t| t.hash),
        };

        match input.entry_type {
            EntryType::Credit => self.stage_credit(tx, key, draft, balance).await,
            EntryType::Debit => self.stage_debit(tx, key, draft, balance).await,
        }
    }

    async fn stage_credit(
        &self,
        tx: &mut S::Tx,
        key: &AccountKey,
        draft: EntryDraft,
        balance: Option<Balance>,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = draft.seal();
        self.store.create_entry(tx, &entry).await?;

        let pool = CreditPool::open(key, entry.id, entry.amount, entry.created_at);
        self.store.create_credit_pool(tx, &pool).await?;

        match balance {
            Some(mut balance) => {
                balance.apply(entry.amount, entry.created_at)?;
                self.store.update_balance(tx, &balance).await?;
            }
            None => {
                let balance = Balance::open(key, entry.amount, entry.created_at);
                self.store.create_balance(tx, &balance).await?;
            }
        }

        Ok(entry)
    }

    async fn stage_debit(
        &self,
        tx: &mut S::Tx,
        key: &AccountKey,
        mut draft: EntryDraft,
        balance: Option<Balance>,
    ) -> Result<LedgerEntry, LedgerError> {
        let pools = self.store.open_pools_for_update(tx, key).await?;
        if pools.is_empty() {
            return Err(LedgerError::InsufficientFunds {
                requested: draft.amount,
                available: 0,
            });
        }
        let Some(mut balance) = balance else {
            return Err(LedgerError::Internal(format!(
                "{key} has open credit pools but no balance row"
            )));
        };

        let allocations = allocate_fifo(&pools, draft.amount)?;
        draft.metadata = draft
            .metadata
            .with_sources(allocations.iter().map(Allocation::source).collect());

        let entry = draft.seal();
        self.store.create_entry(tx, &entry).await?;

        for allocation in &allocations {
            let mut pool = pools
                .iter()
                .find(|p| p.id == allocation.credit_pool_id)
                .cloned()
                .ok_or_else(|| {
                    LedgerError::Internal(format!(
                        "allocated pool {} is not among the locked pools",
                        allocation.credit_pool_id
                    ))
                })?;
            pool.remaining = allocation.remaining_after;
            pool.consumed_at = Some(entry.created_at);
            self.store.update_credit_pool(tx, &pool).await?;
        }

        balance.apply(-entry.amount, entry.created_at)?;
        self.store.update_balance(tx, &balance).await?;

        Ok(entry)
    }

    // ========== RevertEntry ==========

    async fn try_revert_entry(
        &self,
        entry_id: LedgerEntryId,
    ) -> Result<(LedgerEntry, LedgerEntry), LedgerError> {
        let original = self
            .store
            .find_entry(&EntryLookup::Id(entry_id))
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("ledger entry {entry_id}")))?;

        let key = original.account_key();
        let lookup = EntryLookup::reference(&original.organization_id, &original.transaction_id);
        if self.store.find_entry(&lookup).await?.is_some() {
            return Err(already_exists(&original.organization_id, &original.transaction_id));
        }

        let transaction_id = codec::generate_transaction_id()?;

        let deadline = self.deadline();
        let mut tx = self.begin(deadline).await?;
        let staged = timeout_at(
            deadline,
            self.stage_revert(&mut tx, &key, &lookup, &original, transaction_id),
        )
        .await;
        let reversal = self.settle(tx, staged).await.map_err(|err| {
            reference_conflict(err, &original.organization_id, &original.transaction_id)
        })?;

        let current = self
            .store
            .find_entry(&EntryLookup::Id(entry_id))
            .await?
            .ok_or_else(|| LedgerError::Internal(format!("entry {entry_id} vanished after revert")))?;
        Ok((current, reversal))
    }

    async fn stage_revert(
        &self,
        tx: &mut S::Tx,
        key: &AccountKey,
        lookup: &EntryLookup,
        original: &LedgerEntry,
        transaction_id: String,
    ) -> Result<LedgerEntry, LedgerError> {
        self.store.lock_account(tx, key).await?;
        if self.store.find_entry_in(tx, lookup).await?.is_some() {
            return Err(already_exists(&original.organization_id, &original.transaction_id));
        }

        let tail = self.store.last_entry_for_update(tx, key).await?;
        let mut balance = self
            .store
            .find_balance_for_update(tx, key)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("balance for {key}")))?;

        let reversal = EntryDraft {
            id: LedgerEntryId::new(),
            key: key.clone(),
            entry_type: original.entry_type,
            amount: original.amount,
            transaction_id,
            reference_id: original.transaction_id.clone(),
            description: format!("Revert of {}", original.id),
            metadata: EntryMetadata::default().with_reverts(RevertLink {
                entry_id: original.id,
                entry_hash: original.hash.clone(),
            }),
            created_at: next_timestamp(tail.as_ref()),
            previous_hash: tail.map_or_else(|| GENESIS_HASH.to_string(), |t| t.hash),
        }
        .seal();
        self.store.create_entry(tx, &reversal).await?;

        balance.apply(-original.amount, reversal.created_at)?;
        self.store.update_balance(tx, &balance).await?;

        Ok(reversal)
    }

    // ========== ListEntries ==========

    async fn try_list_entries(&self, query: EntryQuery) -> Result<PageResponse<LedgerEntry>, LedgerError> {
        validation::validate_identifier("organization_id", &query.key.organization_id)?;
        validation::validate_identifier("user_id", &query.key.user_id)?;
        validation::validate_range(query.created_from, query.created_to)?;

        let page = query.page.clamped(self.config.max_page_size);
        let filter = EntryFilter {
            key: query.key,
            entry_type: query.entry_type,
            created_from: query.created_from,
            created_to: query.created_to,
            order: query.order,
            page: Some(page),
        };

        let total = self.store.count_entries(&filter).await?;
        let data = self.store.find_entries(&filter).await?;
        Ok(PageResponse::new(data, page.page, page.per_page, total))
    }

    // ========== Transaction plumbing ==========

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.operation_timeout
    }

    async fn begin(&self, deadline: Instant) -> Result<S::Tx, LedgerError> {
        let tx = timeout_at(deadline, self.store.begin())
            .await
            .map_err(|_| LedgerError::Timeout(self.config.operation_timeout))??;
        Ok(tx)
    }

    /// Commits when staging succeeded in time, rolls back otherwise.
    async fn settle<T>(
        &self,
        tx: S::Tx,
        staged: Result<Result<T, LedgerError>, Elapsed>,
    ) -> Result<T, LedgerError> {
        match staged {
            Ok(Ok(value)) => {
                self.store.commit(tx).await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.discard(tx).await;
                Err(err)
            }
            Err(_) => {
                self.discard(tx).await;
                Err(LedgerError::Timeout(self.config.operation_timeout))
            }
        }
    }

    async fn discard(&self, tx: S::Tx) {
        if let Err(err) = self.store.rollback(tx).await {
            tracing::warn!(error = %err, "rollback failed");
        }
    }

    fn failed(&self, operation: Operation, error: &LedgerError) {
        self.observer
            .on_event(&LedgerEvent::OperationFailed { operation, error });
    }

    fn observe<T>(&self, operation: Operation, result: Result<T, LedgerError>) -> Result<T, LedgerError> {
        if let Err(error) = &result {
            self.failed(operation, error);
        }
        result
    }
}

fn already_exists(organization_id: &str, reference_id: &str) -> LedgerError {
    LedgerError::AlreadyExists {
        organization_id: organization_id.to_string(),
        reference_id: reference_id.to_string(),
    }
}

/// A unique violation while writing an entry is a concurrent duplicate reference.
fn reference_conflict(err: LedgerError, organization_id: &str, reference_id: &str) -> LedgerError {
    match err {
        LedgerError::Store(StoreError::UniqueViolation(_)) => already_exists(organization_id, reference_id),
        other => other,
    }
}

/// `created_at` for a new tail: now, or one microsecond past the old tail.
fn next_timestamp(tail: Option<&LedgerEntry>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match tail {
        Some(tail) if now <= tail.created_at => tail
            .created_at
            .checked_add_signed(TimeDelta::microseconds(1))
            .unwrap_or(now),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::EntryMetadata;
    use chrono::Duration as ChronoDuration;

    fn tail_at(created_at: DateTime<Utc>) -> LedgerEntry {
        EntryDraft {
            id: LedgerEntryId::new(),
            key: AccountKey::new("org", "user"),
            entry_type: EntryType::Credit,
            amount: 1,
            transaction_id: "20250101-000000".into(),
            reference_id: "r".into(),
            description: String::new(),
            metadata: EntryMetadata::default(),
            previous_hash: GENESIS_HASH.into(),
            created_at,
        }
        .seal()
    }

    #[test]
    fn test_next_timestamp_moves_past_a_future_tail() {
        let tail = tail_at(Utc::now() + ChronoDuration::seconds(5));
        let next = next_timestamp(Some(&tail));
        assert_eq!(next, tail.created_at + ChronoDuration::microseconds(1));
    }

    #[test]
    fn test_next_timestamp_uses_now_after_an_old_tail() {
        let tail = tail_at(Utc::now() - ChronoDuration::seconds(5));
        let next = next_timestamp(Some(&tail));
        assert!(next > tail.created_at + ChronoDuration::seconds(4));
        assert_eq!(next, next.trunc_subsecs(6));
    }

    #[test]
    fn test_reference_conflict_maps_only_unique_violations() {
        let mapped = reference_conflict(
            LedgerError::Store(StoreError::UniqueViolation("uq".into())),
            "org",
            "r1",
        );
        assert!(matches!(mapped, LedgerError::AlreadyExists { .. }));

        let kept = reference_conflict(LedgerError::Store(StoreError::Backend("x".into())), "org", "r1");
        assert!(matches!(kept, LedgerError::Store(StoreError::Backend(_))));
    }

    #[test]
    fn test_engine_config_from_ledger_config() {
        let config = EngineConfig::from(&LedgerConfig {
            operation_timeout_ms: 250,
            max_page_size: 50,
        });
        assert_eq!(config.operation_timeout, Duration::from_millis(250));
        assert_eq!(config.max_page_size, 50);
    }
}
