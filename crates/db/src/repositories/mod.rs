//! Repository abstractions for data access.
//!
//! Repositories are stateless and generic over the connection, so the same
//! query runs on a pooled connection or inside an open transaction.

pub mod balance;
pub mod credit_pool;
pub mod ledger_entry;

pub use balance::BalanceRepository;
pub use credit_pool::CreditPoolRepository;
pub use ledger_entry::LedgerEntryRepository;
