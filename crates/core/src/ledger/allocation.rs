//! Credit pools and FIFO debit allocation.
//!
//! Every CREDIT opens a pool holding the unconsumed part of that credit. A
//! DEBIT walks the open pools oldest first and takes as much as it can from
//! each until the amount is covered.

use chrono::{DateTime, Utc};
use pointbook_shared::types::{CreditPoolId, LedgerEntryId};
use serde::{Deserialize, Serialize};

use super::entry::{AccountKey, AllocationSource};
use super::error::LedgerError;

/// Remaining, unconsumed part of one CREDIT entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPool {
    /// Unique identifier for this pool.
    pub id: CreditPoolId,
    /// Owning organization.
    pub organization_id: String,
    /// Owning user.
    pub user_id: String,
    /// The CREDIT entry that opened this pool.
    pub ledger_entry_id: LedgerEntryId,
    /// Unconsumed amount; never negative, never increases.
    pub remaining: i64,
    /// FIFO ordering key.
    pub created_at: DateTime<Utc>,
    /// Last time `remaining` changed.
    pub consumed_at: Option<DateTime<Utc>>,
}

impl CreditPool {
    /// Opens a pool for a freshly created CREDIT entry.
    #[must_use]
    pub fn open(key: &AccountKey, ledger_entry_id: LedgerEntryId, amount: i64, at: DateTime<Utc>) -> Self {
        Self {
            id: CreditPoolId::new(),
            organization_id: key.organization_id.clone(),
            user_id: key.user_id.clone(),
            ledger_entry_id,
            remaining: amount,
            created_at: at,
            consumed_at: None,
        }
    }

    /// True while the pool still has credit to give.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.remaining > 0
    }
}

/// Amount taken from a single pool by a debit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Pool being consumed.
    pub credit_pool_id: CreditPoolId,
    /// CREDIT entry behind the pool.
    pub source_entry_id: LedgerEntryId,
    /// Amount taken.
    pub amount: i64,
    /// What the pool holds after this allocation.
    pub remaining_after: i64,
}

impl Allocation {
    /// The metadata record for this allocation.
    #[must_use]
    pub fn source(&self) -> AllocationSource {
        AllocationSource {
            ledger_entry_id: self.source_entry_id,
            amount: self.amount,
        }
    }
}

/// Sum of `remaining` over the given pools.
#[must_use]
pub fn total_remaining(pools: &[CreditPool]) -> i64 {
    pools
        .iter()
        .fold(0i64, |acc, pool| acc.saturating_add(pool.remaining.max(0)))
}

/// Allocates `amount` across `pools`, oldest pool first.
///
/// Pools are ordered by `(created_at, id)` before walking, so callers may
/// pass them in any order. Exhausted pools are skipped.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidArgument`] for a non-positive amount and
/// [`LedgerError::InsufficientFunds`] when the pools cannot cover it. No
/// partial allocation is ever returned.
pub fn allocate_fifo(pools: &[CreditPool], amount: i64) -> Result<Vec<Allocation>, LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidArgument(format!(
            "debit amount must be positive, got {amount}"
        )));
    }

    let available = total_remaining(pools);
    if available < amount {
        return Err(LedgerError::InsufficientFunds {
            requested: amount,
            available,
        });
    }

    let mut ordered: Vec<&CreditPool> = pools.iter().filter(|p| p.is_open()).collect();
    ordered.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

    let mut needed = amount;
    let mut allocations = Vec::new();
    for pool in ordered {
        if needed == 0 {
            break;
        }
        let take = pool.remaining.min(needed);
        allocations.push(Allocation {
            credit_pool_id: pool.id,
            source_entry_id: pool.ledger_entry_id,
            amount: take,
            remaining_after: pool.remaining - take,
        });
        needed -= take;
    }

    if needed > 0 {
        return Err(LedgerError::Internal(format!(
            "allocation left {needed} uncovered despite {available} available"
        )));
    }

    Ok(allocations)
}
