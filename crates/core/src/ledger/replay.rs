//! Re-deriving pools and balance from the entry sequence.
//!
//! Pools and balance are derived state. Replaying a pair's entries in chain
//! order rebuilds them, which lets [`reconcile`] point at any drift between
//! what is stored and what the entries say.

use std::collections::{BTreeMap, BTreeSet};

use pointbook_shared::types::{CreditPoolId, LedgerEntryId};
use serde::{Deserialize, Serialize};

use super::allocation::{CreditPool, total_remaining};
use super::balance::Balance;
use super::entry::{AccountKey, EntryType, LedgerEntry};

/// Pools and balance as rebuilt from entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayedState {
    /// Running balance.
    pub balance: i64,
    /// Remaining amount per opening CREDIT entry.
    pub pools: BTreeMap<LedgerEntryId, i64>,
    /// Entries applied.
    pub entries: usize,
}

impl ReplayedState {
    /// Applies one entry.
    ///
    /// A reversal subtracts its amount and leaves pools alone, whatever its
    /// type. A DEBIT consumes exactly the sources it recorded.
    pub fn apply(&mut self, entry: &LedgerEntry) {
        self.entries += 1;

        if entry.is_reversal() {
            self.balance = self.balance.saturating_sub(entry.amount);
            return;
        }

        match entry.entry_type {
            EntryType::Credit => {
                self.balance = self.balance.saturating_add(entry.amount);
                self.pools.insert(entry.id, entry.amount);
            }
            EntryType::Debit => {
                self.balance = self.balance.saturating_sub(entry.amount);
                for source in &entry.metadata.sources {
                    let remaining = self.pools.entry(source.ledger_entry_id).or_insert(0);
                    *remaining = remaining.saturating_sub(source.amount);
                }
            }
        }
    }

    /// Sum of replayed pool remainders.
    #[must_use]
    pub fn pool_total(&self) -> i64 {
        self.pools.values().fold(0i64, |acc, r| acc.saturating_add(*r))
    }
}

/// Replays `entries` in the order given.
#[must_use]
pub fn replay<'a, I>(entries: I) -> ReplayedState
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    let mut state = ReplayedState::default();
    for entry in entries {
        state.apply(entry);
    }
    state
}

/// Stored and replayed `remaining` of a pool that disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDrift {
    /// CREDIT entry behind the pool.
    pub ledger_entry_id: LedgerEntryId,
    /// Stored pool, when one exists.
    pub credit_pool_id: Option<CreditPoolId>,
    /// Stored `remaining`; `None` when the pool is missing.
    pub stored: Option<i64>,
    /// Replayed `remaining`; `None` when no entry accounts for the pool.
    pub replayed: Option<i64>,
}

/// Comparison of stored derived state against a replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Owning organization.
    pub organization_id: String,
    /// Owning user.
    pub user_id: String,
    /// Entries replayed.
    pub entries_replayed: usize,
    /// Balance row value, zero when absent.
    pub stored_balance: i64,
    /// Sum of stored pool remainders.
    pub stored_pool_total: i64,
    /// Balance rebuilt from entries.
    pub replayed_balance: i64,
    /// Sum of replayed pool remainders.
    pub replayed_pool_total: i64,
    /// Pools whose stored and replayed `remaining` differ.
    pub pool_drift: Vec<PoolDrift>,
    /// Stored balance matches the replay and no pool drifted.
    pub consistent: bool,
}

/// Replays `entries` and compares the result with the stored state.
///
/// `entries` must be in chain order.
#[must_use]
pub fn reconcile(
    key: &AccountKey,
    entries: &[LedgerEntry],
    pools: &[CreditPool],
    balance: Option<&Balance>,
) -> Reconciliation {
    let state = replay(entries);
    let stored_balance = balance.map_or(0, |b| b.balance);

    let mut pool_drift = Vec::new();
    let mut seen = BTreeSet::new();
    for pool in pools {
        seen.insert(pool.ledger_entry_id);
        let replayed = state.pools.get(&pool.ledger_entry_id).copied();
        if replayed != Some(pool.remaining) {
            pool_drift.push(PoolDrift {
                ledger_entry_id: pool.ledger_entry_id,
                credit_pool_id: Some(pool.id),
                stored: Some(pool.remaining),
                replayed,
            });
        }
    }
    for (&ledger_entry_id, &replayed) in &state.pools {
        if !seen.contains(&ledger_entry_id) {
            pool_drift.push(PoolDrift {
                ledger_entry_id,
                credit_pool_id: None,
                stored: None,
                replayed: Some(replayed),
            });
        }
    }

    let consistent = stored_balance == state.balance && pool_drift.is_empty();

    Reconciliation {
        organization_id: key.organization_id.clone(),
        user_id: key.user_id.clone(),
        entries_replayed: state.entries,
        stored_balance,
        stored_pool_total: total_remaining(pools),
        replayed_balance: state.balance,
        replayed_pool_total: state.pool_total(),
        pool_drift,
        consistent,
    }
}
