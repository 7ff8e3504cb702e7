//! # Location Repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::scope::Scope;
use crate::error::RepositoryError;
use crate::models::location::{ActiveModel, Column, Entity as Location, Model};

/// Values for a new or updated location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationInput {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct LocationRepository {
    db: DatabaseConnection,
    scope: Scope,
}

impl LocationRepository {
    pub fn new(db: DatabaseConnection, scope: Scope) -> Self {
        Self { db, scope }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Model>, RepositoryError> {
        let query = Location::find_by_id(id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list(&self) -> Result<Vec<Model>, RepositoryError> {
        let query = Location::find()
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
        let query = Location::find()
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .paginate(&self.db, page_size)
            .fetch_page(page)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn create(&self, input: LocationInput) -> Result<Model, RepositoryError> {
        let actor = self.scope.actor().ok_or(RepositoryError::ScopeRequired)?;
        let now = Utc::now().fixed_offset();

        ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            user_id: Set(actor.user_id),
            name: Set(input.name),
            address: Set(input.address),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn update(&self, id: Uuid, input: LocationInput) -> Result<Model, RepositoryError> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("location {id}")))?;

        let mut active = existing.into_active_model();
        active.name = Set(input.name);
        active.address = Set(input.address);
        active.updated_at = Set(Utc::now().fixed_offset());
        active
            .update(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Deletes every location the acting user owns.
    pub async fn delete_all(&self) -> Result<u64, RepositoryError> {
        let actor = self.scope.actor().ok_or(RepositoryError::ScopeRequired)?;
        let result = Location::delete_many()
            .filter(Column::TenantId.eq(actor.tenant_id))
            .filter(Column::UserId.eq(actor.user_id))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }
}
