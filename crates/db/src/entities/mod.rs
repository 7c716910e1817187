//! `SeaORM` entity definitions.

pub mod balances;
pub mod credit_pools;
pub mod ledger_entries;
pub mod sea_orm_active_enums;
