//! Credit pool repository for database operations.

use chrono::{DateTime, Utc};
use pointbook_core::ledger::{AccountKey, PoolFilter};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Select, Set,
};
use uuid::Uuid;

use crate::entities::credit_pools::{self, Column, Entity};

/// Credit pool queries.
#[derive(Debug, Clone, Copy)]
pub struct CreditPoolRepository;

impl CreditPoolRepository {
    fn for_pair(key: &AccountKey) -> Select<Entity> {
        Entity::find()
            .filter(Column::OrganizationId.eq(key.organization_id.as_str()))
            .filter(Column::UserId.eq(key.user_id.as_str()))
    }

    /// Lists pools matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find<C: ConnectionTrait>(
        conn: &C,
        filter: &PoolFilter,
    ) -> Result<Vec<credit_pools::Model>, DbErr> {
        let mut query = Self::for_pair(&filter.key);
        if filter.open_only {
            query = query.filter(Column::Remaining.gt(0i64));
        }
        query
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(conn)
            .await
    }

    /// Reads the open pools of a pair, oldest first, with `FOR UPDATE`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn open_for_update<C: ConnectionTrait>(
        conn: &C,
        key: &AccountKey,
    ) -> Result<Vec<credit_pools::Model>, DbErr> {
        Self::for_pair(key)
            .filter(Column::Remaining.gt(0i64))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .lock_exclusive()
            .all(conn)
            .await
    }

    /// Inserts a pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert<C: ConnectionTrait>(
        conn: &C,
        pool: credit_pools::ActiveModel,
    ) -> Result<credit_pools::Model, DbErr> {
        pool.insert(conn).await
    }

    /// Writes a new remainder and consumption time.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or the guard trigger rejects it.
    pub async fn consume<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        remaining: i64,
        consumed_at: Option<DateTime<Utc>>,
    ) -> Result<credit_pools::Model, DbErr> {
        credit_pools::ActiveModel {
            id: Set(id),
            remaining: Set(remaining),
            consumed_at: Set(consumed_at.map(Into::into)),
            ..Default::default()
        }
        .update(conn)
        .await
    }
}
