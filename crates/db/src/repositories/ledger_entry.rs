//! Ledger entry repository for database operations.

use pointbook_core::ledger::{AccountKey, EntryFilter, EntryLookup};
use pointbook_shared::types::SortOrder;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select,
};

use crate::entities::ledger_entries::{self, Column, Entity};
use crate::entities::sea_orm_active_enums::LedgerEntryType;

/// Ledger entry queries.
#[derive(Debug, Clone, Copy)]
pub struct LedgerEntryRepository;

impl LedgerEntryRepository {
    fn for_pair(key: &AccountKey) -> Select<Entity> {
        Entity::find()
            .filter(Column::OrganizationId.eq(key.organization_id.as_str()))
            .filter(Column::UserId.eq(key.user_id.as_str()))
    }

    fn filtered(filter: &EntryFilter) -> Select<Entity> {
        let mut query = Self::for_pair(&filter.key);
        if let Some(entry_type) = filter.entry_type {
            query = query.filter(Column::EntryType.eq(LedgerEntryType::from(entry_type)));
        }
        if let Some(from) = filter.created_from {
            query = query.filter(Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.created_to {
            query = query.filter(Column::CreatedAt.lte(to));
        }
        query
    }

    /// Lists entries matching `filter` in `(created_at, id)` order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find<C: ConnectionTrait>(
        conn: &C,
        filter: &EntryFilter,
    ) -> Result<Vec<ledger_entries::Model>, DbErr> {
        let mut query = match filter.order {
            SortOrder::Asc => Self::filtered(filter)
                .order_by_asc(Column::CreatedAt)
                .order_by_asc(Column::Id),
            SortOrder::Desc => Self::filtered(filter)
                .order_by_desc(Column::CreatedAt)
                .order_by_desc(Column::Id),
        };
        if let Some(page) = filter.page {
            query = query.offset(page.offset()).limit(page.limit());
        }
        query.all(conn).await
    }

    /// Counts entries matching `filter`, ignoring paging.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count<C: ConnectionTrait>(conn: &C, filter: &EntryFilter) -> Result<u64, DbErr> {
        Self::filtered(filter).count(conn).await
    }

    /// Finds one entry by id or by `(organization_id, reference_id)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_one<C: ConnectionTrait>(
        conn: &C,
        lookup: &EntryLookup,
    ) -> Result<Option<ledger_entries::Model>, DbErr> {
        match lookup {
            EntryLookup::Id(id) => Entity::find_by_id(id.into_inner()).one(conn).await,
            EntryLookup::Reference {
                organization_id,
                reference_id,
            } => {
                Entity::find()
                    .filter(Column::OrganizationId.eq(organization_id.as_str()))
                    .filter(Column::ReferenceId.eq(reference_id.as_str()))
                    .one(conn)
                    .await
            }
        }
    }

    /// Reads the chain tail of a pair with `FOR UPDATE`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn last_for_update<C: ConnectionTrait>(
        conn: &C,
        key: &AccountKey,
    ) -> Result<Option<ledger_entries::Model>, DbErr> {
        Self::for_pair(key)
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .lock_exclusive()
            .one(conn)
            .await
    }

    /// Inserts an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails, including unique violations.
    pub async fn insert<C: ConnectionTrait>(
        conn: &C,
        entry: ledger_entries::ActiveModel,
    ) -> Result<ledger_entries::Model, DbErr> {
        entry.insert(conn).await
    }
}
