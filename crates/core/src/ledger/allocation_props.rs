//! Property-based tests for FIFO allocation.
//!
//! - Allocations sum to the debit amount
//! - Older pools are drained before newer ones are touched
//! - A debit larger than the available credit never allocates

use chrono::{Duration, Utc};
use pointbook_shared::types::LedgerEntryId;
use proptest::prelude::*;

use super::allocation::{CreditPool, allocate_fifo, total_remaining};
use super::entry::AccountKey;
use super::error::LedgerError;

/// Strategy for pool remainders, exhausted pools included.
fn remainders() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..10_000, 1..12)
}

fn make_pools(remaining: &[i64]) -> Vec<CreditPool> {
    let key = AccountKey::new("org", "user");
    let start = Utc::now();
    remaining
        .iter()
        .zip(0i64..)
        .map(|(&r, i)| {
            let mut pool = CreditPool::open(&key, LedgerEntryId::new(), r, start + Duration::seconds(i));
            pool.remaining = r;
            pool
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_allocations_cover_amount_exactly(remaining in remainders(), pick in 1u64..u64::MAX) {
        let pools = make_pools(&remaining);
        let available = total_remaining(&pools);
        prop_assume!(available > 0);
        let amount = i64::try_from(pick % u64::try_from(available).unwrap()).unwrap() + 1;

        let allocations = allocate_fifo(&pools, amount).unwrap();
        let total: i64 = allocations.iter().map(|a| a.amount).sum();
        prop_assert_eq!(total, amount);
        for allocation in &allocations {
            prop_assert!(allocation.amount > 0);
            prop_assert!(allocation.remaining_after >= 0);
        }
    }

    #[test]
    fn prop_only_the_last_touched_pool_is_partial(remaining in remainders(), pick in 1u64..u64::MAX) {
        let pools = make_pools(&remaining);
        let available = total_remaining(&pools);
        prop_assume!(available > 0);
        let amount = i64::try_from(pick % u64::try_from(available).unwrap()).unwrap() + 1;

        let allocations = allocate_fifo(&pools, amount).unwrap();
        let (last, drained) = allocations.split_last().unwrap();
        for allocation in drained {
            prop_assert_eq!(allocation.remaining_after, 0);
        }

        // Every open pool older than the last touched one was drained.
        let last_index = pools.iter().position(|p| p.id == last.credit_pool_id).unwrap();
        let open_before = pools[..last_index].iter().filter(|p| p.is_open()).count();
        prop_assert_eq!(open_before, drained.len());
    }

    #[test]
    fn prop_overdraft_never_allocates(remaining in remainders(), excess in 1i64..1_000) {
        let pools = make_pools(&remaining);
        let available = total_remaining(&pools);

        let result = allocate_fifo(&pools, available + excess);
        let is_insufficient = matches!(
            result,
            Err(LedgerError::InsufficientFunds { requested, available: reported })
                if requested == available + excess && reported == available
        );
        prop_assert!(is_insufficient);
    }
}
