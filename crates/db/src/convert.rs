//! Row to domain conversions.

use chrono::Utc;
use pointbook_core::ledger::{Balance, CreditPool, EntryMetadata, LedgerEntry, StoreError};
use pointbook_shared::types::{BalanceId, CreditPoolId, LedgerEntryId};
use sea_orm::Set;

use crate::entities::{balances, credit_pools, ledger_entries};

pub(crate) fn entry_from_model(model: ledger_entries::Model) -> Result<LedgerEntry, StoreError> {
    Ok(LedgerEntry {
        id: LedgerEntryId::from_uuid(model.id),
        organization_id: model.organization_id,
        user_id: model.user_id,
        entry_type: model.entry_type.into(),
        amount: model.amount,
        transaction_id: model.transaction_id,
        reference_id: model.reference_id,
        description: model.description,
        metadata: EntryMetadata::from_json(model.metadata)?,
        previous_hash: model.previous_hash,
        hash: model.hash,
        created_at: model.created_at.with_timezone(&Utc),
    })
}

pub(crate) fn entry_to_active(entry: &LedgerEntry) -> Result<ledger_entries::ActiveModel, StoreError> {
    Ok(ledger_entries::ActiveModel {
        id: Set(entry.id.into_inner()),
        organization_id: Set(entry.organization_id.clone()),
        user_id: Set(entry.user_id.clone()),
        entry_type: Set(entry.entry_type.into()),
        amount: Set(entry.amount),
        transaction_id: Set(entry.transaction_id.clone()),
        reference_id: Set(entry.reference_id.clone()),
        description: Set(entry.description.clone()),
        metadata: Set(entry.metadata.to_json()?),
        previous_hash: Set(entry.previous_hash.clone()),
        hash: Set(entry.hash.clone()),
        created_at: Set(entry.created_at.into()),
    })
}

pub(crate) fn pool_from_model(model: credit_pools::Model) -> CreditPool {
    CreditPool {
        id: CreditPoolId::from_uuid(model.id),
        organization_id: model.organization_id,
        user_id: model.user_id,
        ledger_entry_id: LedgerEntryId::from_uuid(model.ledger_entry_id),
        remaining: model.remaining,
        created_at: model.created_at.with_timezone(&Utc),
        consumed_at: model.consumed_at.map(|at| at.with_timezone(&Utc)),
    }
}

pub(crate) fn pool_to_active(pool: &CreditPool) -> credit_pools::ActiveModel {
    credit_pools::ActiveModel {
        id: Set(pool.id.into_inner()),
        organization_id: Set(pool.organization_id.clone()),
        user_id: Set(pool.user_id.clone()),
        ledger_entry_id: Set(pool.ledger_entry_id.into_inner()),
        remaining: Set(pool.remaining),
        created_at: Set(pool.created_at.into()),
        consumed_at: Set(pool.consumed_at.map(Into::into)),
    }
}

pub(crate) fn balance_from_model(model: balances::Model) -> Balance {
    Balance {
        id: BalanceId::from_uuid(model.id),
        organization_id: model.organization_id,
        user_id: model.user_id,
        balance: model.balance,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

pub(crate) fn balance_to_active(balance: &Balance) -> balances::ActiveModel {
    balances::ActiveModel {
        id: Set(balance.id.into_inner()),
        organization_id: Set(balance.organization_id.clone()),
        user_id: Set(balance.user_id.clone()),
        balance: Set(balance.balance),
        created_at: Set(balance.created_at.into()),
        updated_at: Set(balance.updated_at.into()),
    }
}
