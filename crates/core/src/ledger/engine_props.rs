//! Property-based tests for the engine over the in-process store.
//!
//! - Balance equals the sum of pool remainders after any CREDIT/DEBIT history
//! - The chain stays valid and replay matches stored state
//! - A rejected debit changes nothing

use std::sync::Arc;

use proptest::prelude::*;

use super::engine::LedgerEngine;
use super::entry::{AccountKey, EntryType};
use super::error::LedgerError;
use super::memory::InMemoryLedgerStore;
use super::store::{CreditPoolStore, EntryFilter, EntryStore, PoolFilter};
use super::types::AddEntryInput;

#[derive(Debug, Clone, Copy)]
enum Step {
    Credit(i64),
    Debit(i64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1i64..5_000).prop_map(Step::Credit),
        (1i64..5_000).prop_map(Step::Debit),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_balance_matches_pools(steps in prop::collection::vec(step(), 1..30)) {
        runtime().block_on(async {
            let store = Arc::new(InMemoryLedgerStore::new());
            let engine = LedgerEngine::new(Arc::clone(&store));
            let key = AccountKey::new("org", "user");
            let mut expected = 0i64;
            let mut committed = 0usize;

            for (i, step) in steps.iter().enumerate() {
                let (entry_type, amount) = match *step {
                    Step::Credit(amount) => (EntryType::Credit, amount),
                    Step::Debit(amount) => (EntryType::Debit, amount),
                };
                let input = AddEntryInput::new(&key, entry_type, amount, format!("ref-{i}"));
                match engine.add_entry(input).await {
                    Ok(_) => {
                        committed += 1;
                        expected += if entry_type == EntryType::Credit { amount } else { -amount };
                    }
                    Err(LedgerError::InsufficientFunds { requested, available }) => {
                        prop_assert_eq!(entry_type, EntryType::Debit);
                        prop_assert_eq!(requested, amount);
                        prop_assert_eq!(available, expected);
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {other}"),
                }

                let balance = engine.get_balance(&key).await.unwrap();
                let pools = store.find_credit_pools(&PoolFilter::all(key.clone())).await.unwrap();
                let pool_total: i64 = pools.iter().map(|p| p.remaining).sum();
                prop_assert_eq!(balance.balance, expected);
                prop_assert_eq!(pool_total, expected);
                prop_assert!(pools.iter().all(|p| p.remaining >= 0));
            }

            let entries = store.find_entries(&EntryFilter::chain(key.clone())).await.unwrap();
            prop_assert_eq!(entries.len(), committed);

            let report = engine.verify_chain(&key).await.unwrap();
            prop_assert!(report.is_valid());
            prop_assert_eq!(report.entries_checked, committed);

            let reconciliation = engine.reconcile(&key).await.unwrap();
            prop_assert!(reconciliation.consistent);
            prop_assert_eq!(reconciliation.replayed_balance, expected);
            Ok(())
        })?;
    }
}
