//! Balance repository for database operations.

use chrono::{DateTime, Utc};
use pointbook_core::ledger::AccountKey;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QuerySelect,
    Select, Set,
};
use uuid::Uuid;

use crate::entities::balances::{self, Column, Entity};

/// Balance queries.
#[derive(Debug, Clone, Copy)]
pub struct BalanceRepository;

impl BalanceRepository {
    fn for_pair(key: &AccountKey) -> Select<Entity> {
        Entity::find()
            .filter(Column::OrganizationId.eq(key.organization_id.as_str()))
            .filter(Column::UserId.eq(key.user_id.as_str()))
    }

    /// Finds the balance row of a pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find<C: ConnectionTrait>(
        conn: &C,
        key: &AccountKey,
    ) -> Result<Option<balances::Model>, DbErr> {
        Self::for_pair(key).one(conn).await
    }

    /// Finds the balance row of a pair with `FOR UPDATE`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_for_update<C: ConnectionTrait>(
        conn: &C,
        key: &AccountKey,
    ) -> Result<Option<balances::Model>, DbErr> {
        Self::for_pair(key).lock_exclusive().one(conn).await
    }

    /// Inserts the balance row of a pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails, including unique violations.
    pub async fn insert<C: ConnectionTrait>(
        conn: &C,
        balance: balances::ActiveModel,
    ) -> Result<balances::Model, DbErr> {
        balance.insert(conn).await
    }

    /// Writes a new balance value.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        balance: i64,
        updated_at: DateTime<Utc>,
    ) -> Result<balances::Model, DbErr> {
        balances::ActiveModel {
            id: Set(id),
            balance: Set(balance),
            updated_at: Set(updated_at.into()),
            ..Default::default()
        }
        .update(conn)
        .await
    }
}
