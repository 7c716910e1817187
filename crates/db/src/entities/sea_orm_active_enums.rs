//! `SeaORM` active enums.

use pointbook_core::ledger::EntryType;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Postgres `ledger_entry_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "ledger_entry_type")]
pub enum LedgerEntryType {
    /// Earn.
    #[sea_orm(string_value = "CREDIT")]
    Credit,
    /// Spend.
    #[sea_orm(string_value = "DEBIT")]
    Debit,
}

impl From<EntryType> for LedgerEntryType {
    fn from(value: EntryType) -> Self {
        match value {
            EntryType::Credit => Self::Credit,
            EntryType::Debit => Self::Debit,
        }
    }
}

impl From<LedgerEntryType> for EntryType {
    fn from(value: LedgerEntryType) -> Self {
        match value {
            LedgerEntryType::Credit => Self::Credit,
            LedgerEntryType::Debit => Self::Debit,
        }
    }
}
