//! `PostgreSQL` persistence for the Pointbook ledger.
//!
//! This crate provides:
//! - `SeaORM` entity definitions
//! - Repositories generic over connection or transaction
//! - [`PgLedgerStore`], the production ledger store
//! - Database migrations

pub mod entities;
pub mod migration;
pub mod repositories;

mod convert;
mod store;

pub use repositories::{BalanceRepository, CreditPoolRepository, LedgerEntryRepository};
pub use store::PgLedgerStore;

use std::time::Duration;

use pointbook_shared::config::DatabaseConfig;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

/// Establishes a connection pool from configuration.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .sqlx_logging(false);
    tracing::debug!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Opening database pool"
    );
    Database::connect(options).await
}
