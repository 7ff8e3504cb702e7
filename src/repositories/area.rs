//! # Area Repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::scope::Scope;
use crate::error::RepositoryError;
use crate::models::area::{ActiveModel, Column, Entity as Area, Model};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaInput {
    pub location_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AreaRepository {
    db: DatabaseConnection,
    scope: Scope,
}

impl AreaRepository {
    pub fn new(db: DatabaseConnection, scope: Scope) -> Self {
        Self { db, scope }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Model>, RepositoryError> {
        let query = Area::find_by_id(id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list(&self) -> Result<Vec<Model>, RepositoryError> {
        let query = Area::find()
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// One page of [`Self::list`], zero-based.
    pub async fn list_page(&self, page: u64, page_size: u64) -> Result<Vec<Model>, RepositoryError> {
        let query = Area::find()
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .paginate(&self.db, page_size)
            .fetch_page(page)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list_by_location(&self, location_id: Uuid) -> Result<Vec<Model>, RepositoryError> {
        let query = Area::find()
            .filter(Column::LocationId.eq(location_id))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn create(&self, input: AreaInput) -> Result<Model, RepositoryError> {
        let actor = self.scope.actor().ok_or(RepositoryError::ScopeRequired)?;
        let now = Utc::now().fixed_offset();

        ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            user_id: Set(actor.user_id),
            location_id: Set(input.location_id),
            name: Set(input.name),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn update(&self, id: Uuid, input: AreaInput) -> Result<Model, RepositoryError> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("area {id}")))?;

        let mut active = existing.into_active_model();
        active.location_id = Set(input.location_id);
        active.name = Set(input.name);
        active.updated_at = Set(Utc::now().fixed_offset());
        active
            .update(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn delete_all(&self) -> Result<u64, RepositoryError> {
        let actor = self.scope.actor().ok_or(RepositoryError::ScopeRequired)?;
        let result = Area::delete_many()
            .filter(Column::TenantId.eq(actor.tenant_id))
            .filter(Column::UserId.eq(actor.user_id))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }
}
