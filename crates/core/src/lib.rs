//! Core business logic for Pointbook.
//!
//! This crate contains the ledger engine with ZERO web or database dependencies.
//! Persistence is reached only through the store traits in [`ledger::store`].
//!
//! # Modules
//!
//! - `ledger` - Hash-chained entries, FIFO credit pools, balances, and the engine

pub mod ledger;
