//! Hash-chained point ledger.
//!
//! This module implements the ledger engine:
//! - Entries, their canonical encoding and hash chain
//! - Credit pools and FIFO debit allocation
//! - The materialized balance
//! - Chain verification and replay
//! - Store contracts and an in-process store
//! - The engine that ties them together

pub mod allocation;
pub mod balance;
pub mod chain;
pub mod codec;
pub mod engine;
pub mod entry;
pub mod error;
pub mod memory;
pub mod observer;
pub mod replay;
pub mod store;
pub mod types;
pub mod validation;

#[cfg(test)]
mod allocation_props;
#[cfg(test)]
mod engine_props;

pub use allocation::{Allocation, CreditPool, allocate_fifo};
pub use balance::{Balance, BalanceSnapshot};
pub use chain::{ChainBreak, ChainBreakKind, ChainVerification, verify_chain};
pub use codec::{GENESIS_HASH, compute_hash, generate_transaction_id, verify_hash};
pub use engine::{EngineConfig, LedgerEngine};
pub use entry::{AccountKey, AllocationSource, EntryMetadata, EntryType, LedgerEntry, RevertLink};
pub use error::{ErrorKind, LedgerError};
pub use memory::InMemoryLedgerStore;
pub use observer::{LedgerEvent, LedgerObserver, Operation, TracingObserver};
pub use replay::{PoolDrift, Reconciliation, replay};
pub use store::{
    BalanceStore, CreditPoolStore, EntryFilter, EntryLookup, EntryStore, LedgerStore, PoolFilter,
    StoreError, Transactional,
};
pub use types::{AddEntryInput, EntryQuery};
