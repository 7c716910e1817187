//! Engine behaviour over the in-process store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::TimeDelta;
use pointbook_core::ledger::{
    AccountKey, AddEntryInput, ChainBreakKind, CreditPoolStore, EngineConfig, EntryFilter,
    EntryQuery, EntryStore, EntryType, ErrorKind, GENESIS_HASH, InMemoryLedgerStore, LedgerEngine,
    LedgerError, LedgerEvent, LedgerObserver, Operation, PoolFilter, Transactional, compute_hash,
};
use pointbook_shared::types::{LedgerEntryId, PageRequest, SortOrder};
use serde_json::{Map, json};

fn key() -> AccountKey {
    AccountKey::new("org-1", "user-1")
}

fn engine() -> (Arc<InMemoryLedgerStore>, LedgerEngine<InMemoryLedgerStore>) {
    let store = Arc::new(InMemoryLedgerStore::new());
    (Arc::clone(&store), LedgerEngine::new(store))
}

fn credit(amount: i64, reference_id: &str) -> AddEntryInput {
    AddEntryInput::new(&key(), EntryType::Credit, amount, reference_id)
}

fn debit(amount: i64, reference_id: &str) -> AddEntryInput {
    AddEntryInput::new(&key(), EntryType::Debit, amount, reference_id)
}

async fn pool_remainders(store: &InMemoryLedgerStore) -> Vec<i64> {
    store
        .find_credit_pools(&PoolFilter::all(key()))
        .await
        .unwrap()
        .iter()
        .map(|p| p.remaining)
        .collect()
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl LedgerObserver for RecordingObserver {
    fn on_event(&self, event: &LedgerEvent<'_>) {
        let line = match event {
            LedgerEvent::EntryAdded { entry } => format!("added:{}", entry.reference_id),
            LedgerEvent::EntryReverted { original, .. } => format!("reverted:{}", original.reference_id),
            LedgerEvent::ChainVerified { report, .. } => format!("verified:{}", report.is_valid()),
            LedgerEvent::OperationFailed { operation, error } => {
                format!("failed:{operation}:{}", error.error_code())
            }
        };
        self.events.lock().unwrap().push(line);
    }
}

#[tokio::test]
async fn test_earn_earn_spend_scenario() {
    let (store, engine) = engine();

    let e1 = engine.add_entry(credit(1000, "r1")).await.unwrap();
    let e2 = engine.add_entry(credit(500, "r2")).await.unwrap();
    let e3 = engine.add_entry(debit(700, "r3")).await.unwrap();

    assert_eq!(engine.get_balance(&key()).await.unwrap().balance, 800);
    assert_eq!(pool_remainders(&store).await, vec![300, 500]);

    assert_eq!(e1.previous_hash, GENESIS_HASH);
    assert_eq!(e2.previous_hash, e1.hash);
    assert_eq!(e3.previous_hash, e2.hash);
    assert_eq!(e3.metadata.sources.len(), 1);
    assert_eq!(e3.metadata.sources[0].ledger_entry_id, e1.id);
    assert_eq!(e3.metadata.sources[0].amount, 700);

    let report = engine.verify_chain(&key()).await.unwrap();
    assert!(report.is_valid());
    assert_eq!(report.entries_checked, 3);
    assert_eq!(report.tail_hash, e3.hash);
}

#[tokio::test]
async fn test_every_stored_hash_recomputes() {
    let (store, engine) = engine();
    engine.add_entry(credit(40, "r1")).await.unwrap();
    engine.add_entry(debit(15, "r2")).await.unwrap();
    engine.add_entry(credit(5, "r3")).await.unwrap();

    let entries = store.find_entries(&EntryFilter::chain(key())).await.unwrap();
    for entry in &entries {
        assert_eq!(compute_hash(entry), entry.hash);
    }
    for pair in entries.windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].hash);
        assert!(pair[1].created_at > pair[0].created_at);
    }
}

#[tokio::test]
async fn test_fifo_consumes_oldest_pools_first() {
    let (store, engine) = engine();
    engine.add_entry(credit(100, "c1")).await.unwrap();
    engine.add_entry(credit(50, "c2")).await.unwrap();
    engine.add_entry(credit(200, "c3")).await.unwrap();

    let spent = engine.add_entry(debit(120, "d1")).await.unwrap();

    assert_eq!(pool_remainders(&store).await, vec![0, 30, 200]);
    let taken: Vec<i64> = spent.metadata.sources.iter().map(|s| s.amount).collect();
    assert_eq!(taken, vec![100, 20]);

    let exhausted = store
        .find_credit_pools(&PoolFilter::all(key()))
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    assert_eq!(exhausted.consumed_at, Some(spent.created_at));
}

#[tokio::test]
async fn test_duplicate_reference_is_rejected_without_side_effects() {
    let (store, engine) = engine();
    engine.add_entry(credit(100, "r1")).await.unwrap();

    let err = engine.add_entry(credit(999, "r1")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    // Reference ids are unique per organization, not per user.
    let other_user = AddEntryInput::new(&AccountKey::new("org-1", "user-2"), EntryType::Credit, 5, "r1");
    assert_eq!(
        engine.add_entry(other_user).await.unwrap_err().kind(),
        ErrorKind::AlreadyExists
    );

    let other_org = AddEntryInput::new(&AccountKey::new("org-2", "user-1"), EntryType::Credit, 5, "r1");
    assert!(engine.add_entry(other_org).await.is_ok());

    assert_eq!(engine.get_balance(&key()).await.unwrap().balance, 100);
    assert_eq!(store.count_entries(&EntryFilter::chain(key())).await.unwrap(), 1);
}

#[tokio::test]
async fn test_insufficient_funds_leaves_no_trace() {
    let (store, engine) = engine();

    let err = engine.add_entry(debit(10, "d0")).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            requested: 10,
            available: 0
        }
    ));

    engine.add_entry(credit(500, "r1")).await.unwrap();
    let before = store.find_entries(&EntryFilter::chain(key())).await.unwrap();

    let err = engine.add_entry(debit(700, "r2")).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            requested: 700,
            available: 500
        }
    ));

    assert_eq!(store.find_entries(&EntryFilter::chain(key())).await.unwrap(), before);
    assert_eq!(pool_remainders(&store).await, vec![500]);
    assert_eq!(engine.get_balance(&key()).await.unwrap().balance, 500);

    // The rejected reference id stays free.
    assert!(engine.add_entry(debit(200, "r2")).await.is_ok());
}

#[tokio::test]
async fn test_tampered_amount_is_detected() {
    let (store, engine) = engine();
    engine.add_entry(credit(10, "r1")).await.unwrap();
    let target = engine.add_entry(credit(20, "r2")).await.unwrap();
    engine.add_entry(credit(30, "r3")).await.unwrap();

    let mut forged = target.clone();
    forged.amount = 2000;
    store.replace_entry_unchecked(forged).unwrap();

    let report = engine.verify_chain(&key()).await.unwrap();
    assert!(!report.is_valid());
    let broken = report.first_break.unwrap();
    assert_eq!(broken.position, 1);
    assert_eq!(broken.entry_id, target.id);
    match broken.kind {
        ChainBreakKind::HashMismatch { expected, actual } => {
            assert_eq!(actual, target.hash);
            assert_ne!(expected, target.hash);
        }
        other => panic!("expected a hash mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rejected_inputs() {
    let (_, engine) = engine();

    let mut bad = credit(0, "r1");
    assert_eq!(engine.add_entry(bad.clone()).await.unwrap_err().kind(), ErrorKind::InvalidArgument);

    bad.amount = 10;
    bad.reference_id = String::new();
    assert_eq!(engine.add_entry(bad.clone()).await.unwrap_err().kind(), ErrorKind::InvalidArgument);

    bad.reference_id = "r1".into();
    bad.organization_id = String::new();
    assert_eq!(engine.add_entry(bad).await.unwrap_err().kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn test_caller_metadata_is_kept_and_sources_are_owned_by_the_engine() {
    let (store, engine) = engine();
    engine.add_entry(credit(100, "r1")).await.unwrap();

    let mut metadata = Map::new();
    metadata.insert("channel".into(), json!("pos"));
    let mut forged = metadata.clone();
    forged.insert("sources".into(), json!("forged"));
    let err = engine
        .add_entry(debit(30, "r2").with_metadata(forged))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(store.count_entries(&EntryFilter::chain(key())).await.unwrap(), 1);

    let spent = engine
        .add_entry(debit(30, "r2").with_description("coffee").with_metadata(metadata))
        .await
        .unwrap();

    assert_eq!(spent.description, "coffee");
    assert_eq!(spent.metadata.extra.get("channel"), Some(&json!("pos")));
    assert_eq!(spent.metadata.sources.len(), 1);
    assert_eq!(spent.metadata.sources[0].amount, 30);
}

#[tokio::test]
async fn test_revert_keeps_the_chain_valid() {
    let (store, engine) = engine();
    let e1 = engine.add_entry(credit(100, "r1")).await.unwrap();
    let e2 = engine.add_entry(credit(50, "r2")).await.unwrap();

    let returned = engine.revert_entry(e1.id).await.unwrap();
    assert_eq!(returned, e1);

    let entries = store.find_entries(&EntryFilter::chain(key())).await.unwrap();
    assert_eq!(entries.len(), 3);
    let reversal = &entries[2];
    assert_eq!(reversal.previous_hash, e2.hash);
    assert_eq!(reversal.entry_type, EntryType::Credit);
    assert_eq!(reversal.amount, 100);
    assert_eq!(reversal.reference_id, e1.transaction_id);
    assert_eq!(reversal.description, format!("Revert of {}", e1.id));
    let link = reversal.metadata.reverts.as_ref().unwrap();
    assert_eq!(link.entry_id, e1.id);
    assert_eq!(link.entry_hash, e1.hash);

    assert!(engine.verify_chain(&key()).await.unwrap().is_valid());
}

#[tokio::test]
async fn test_revert_decrements_balance_but_not_pools() {
    let (store, engine) = engine();
    let e1 = engine.add_entry(credit(100, "r1")).await.unwrap();
    engine.add_entry(credit(50, "r2")).await.unwrap();

    engine.revert_entry(e1.id).await.unwrap();

    assert_eq!(engine.get_balance(&key()).await.unwrap().balance, 50);
    assert_eq!(pool_remainders(&store).await, vec![100, 50]);

    // Replay agrees with the stored state; the gap to the pools is visible.
    let reconciliation = engine.reconcile(&key()).await.unwrap();
    assert!(reconciliation.consistent);
    assert_eq!(reconciliation.stored_balance, 50);
    assert_eq!(reconciliation.stored_pool_total, 150);
}

#[tokio::test]
async fn test_reverting_a_debit_also_decrements() {
    let (_, engine) = engine();
    engine.add_entry(credit(100, "r1")).await.unwrap();
    let spent = engine.add_entry(debit(40, "r2")).await.unwrap();

    engine.revert_entry(spent.id).await.unwrap();
    assert_eq!(engine.get_balance(&key()).await.unwrap().balance, 20);
}

#[tokio::test]
async fn test_revert_twice_is_already_exists() {
    let (_, engine) = engine();
    let e1 = engine.add_entry(credit(100, "r1")).await.unwrap();

    engine.revert_entry(e1.id).await.unwrap();
    let err = engine.revert_entry(e1.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(engine.get_balance(&key()).await.unwrap().balance, 0);
}

#[tokio::test]
async fn test_revert_unknown_entry_is_not_found() {
    let (_, engine) = engine();
    let err = engine.revert_entry(LedgerEntryId::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = engine.get_entry(LedgerEntryId::new()).await.unwrap_err();
    assert_eq!(err.http_status_code(), 404);
}

#[tokio::test]
async fn test_balance_of_unknown_pair_is_zero() {
    let (_, engine) = engine();
    let snapshot = engine.get_balance(&AccountKey::new("nobody", "here")).await.unwrap();
    assert_eq!(snapshot.balance, 0);
    assert!(snapshot.last_updated_at.is_none());

    let report = engine.verify_chain(&AccountKey::new("nobody", "here")).await.unwrap();
    assert!(report.is_valid());
    assert_eq!(report.entries_checked, 0);
}

#[tokio::test]
async fn test_list_entries_pages_and_filters() {
    let (_, engine) = engine();
    for i in 0..5 {
        engine.add_entry(credit(10, &format!("c{i}"))).await.unwrap();
    }
    engine.add_entry(debit(5, "d0")).await.unwrap();

    let newest = engine.list_entries(EntryQuery::new(key())).await.unwrap();
    assert_eq!(newest.meta.total, 6);
    assert_eq!(newest.data[0].reference_id, "d0");

    let mut query = EntryQuery::new(key());
    query.order = SortOrder::Asc;
    query.page = PageRequest::new(2, 2);
    let page = engine.list_entries(query).await.unwrap();
    let refs: Vec<&str> = page.data.iter().map(|e| e.reference_id.as_str()).collect();
    assert_eq!(refs, vec!["c2", "c3"]);
    assert_eq!(page.meta.total_pages, 3);

    let mut query = EntryQuery::new(key());
    query.entry_type = Some(EntryType::Debit);
    let debits = engine.list_entries(query).await.unwrap();
    assert_eq!(debits.meta.total, 1);

    let mut query = EntryQuery::new(key());
    query.page = PageRequest::new(0, 10_000);
    let clamped = engine.list_entries(query).await.unwrap();
    assert_eq!(clamped.meta.page, 1);
    assert_eq!(clamped.meta.per_page, 100);
}

#[tokio::test]
async fn test_list_entries_by_time_range() {
    let (_, engine) = engine();
    let first = engine.add_entry(credit(10, "c1")).await.unwrap();
    let second = engine.add_entry(credit(10, "c2")).await.unwrap();

    let mut query = EntryQuery::new(key());
    query.created_from = Some(second.created_at);
    let page = engine.list_entries(query).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].id, second.id);

    let mut inverted = EntryQuery::new(key());
    inverted.created_from = Some(second.created_at);
    inverted.created_to = Some(first.created_at - TimeDelta::microseconds(1));
    assert_eq!(
        engine.list_entries(inverted).await.unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() {
    let (store, engine) = engine();
    engine.add_entry(credit(100, "seed")).await.unwrap();

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.add_entry(debit(10, &format!("d{i}"))).await })
        })
        .collect();

    let mut succeeded = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::InsufficientFunds),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(engine.get_balance(&key()).await.unwrap().balance, 0);
    assert_eq!(pool_remainders(&store).await, vec![0]);
    assert!(engine.verify_chain(&key()).await.unwrap().is_valid());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_credits_form_one_chain() {
    let (_, engine) = engine();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.add_entry(credit(i + 1, &format!("c{i}"))).await })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    let report = engine.verify_chain(&key()).await.unwrap();
    assert!(report.is_valid());
    assert_eq!(report.entries_checked, 16);
    assert_eq!(engine.get_balance(&key()).await.unwrap().balance, (1..=16).sum::<i64>());
}

#[tokio::test]
async fn test_lock_timeout_leaves_no_partial_writes() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let engine = LedgerEngine::new(Arc::clone(&store)).with_config(EngineConfig {
        operation_timeout: Duration::from_millis(50),
        max_page_size: 100,
    });
    engine.add_entry(credit(100, "r1")).await.unwrap();

    let mut holder = store.begin().await.unwrap();
    store.lock_account(&mut holder, &key()).await.unwrap();

    let err = engine.add_entry(debit(10, "r2")).await.unwrap_err();
    assert!(matches!(err, LedgerError::Timeout(_)));
    assert_eq!(err.error_code(), "TIMEOUT");
    assert!(err.is_retryable());

    store.rollback(holder).await.unwrap();

    assert_eq!(engine.get_balance(&key()).await.unwrap().balance, 100);
    assert_eq!(store.count_entries(&EntryFilter::chain(key())).await.unwrap(), 1);
    assert!(engine.add_entry(debit(10, "r2")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_lock_wait_is_bounded_by_one_operation_timeout() {
    let timeout = Duration::from_millis(200);
    let store = Arc::new(InMemoryLedgerStore::new());
    let engine = LedgerEngine::new(Arc::clone(&store)).with_config(EngineConfig {
        operation_timeout: timeout,
        max_page_size: 100,
    });

    let mut holder = store.begin().await.unwrap();
    store.lock_account(&mut holder, &key()).await.unwrap();

    let started = tokio::time::Instant::now();
    let err = engine.add_entry(credit(10, "r1")).await.unwrap_err();
    assert!(matches!(err, LedgerError::Timeout(d) if d == timeout));
    let elapsed = started.elapsed();
    assert!(elapsed >= timeout && elapsed < timeout * 2, "took {elapsed:?}");

    store.rollback(holder).await.unwrap();
}

#[tokio::test]
async fn test_observer_sees_successes_and_failures() {
    let observer = Arc::new(RecordingObserver::default());
    let engine = LedgerEngine::new(Arc::new(InMemoryLedgerStore::new()))
        .with_observer(Arc::clone(&observer) as Arc<dyn LedgerObserver>);

    let e1 = engine.add_entry(credit(10, "r1")).await.unwrap();
    let _ = engine.add_entry(debit(50, "r2")).await;
    engine.revert_entry(e1.id).await.unwrap();
    engine.verify_chain(&key()).await.unwrap();

    let events = observer.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "added:r1".to_string(),
            format!("failed:{}:INSUFFICIENT_FUNDS", Operation::AddEntry),
            "reverted:r1".to_string(),
            "verified:true".to_string(),
        ]
    );
}
