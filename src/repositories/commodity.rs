//! # Commodity Repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::scope::Scope;
use crate::error::RepositoryError;
use crate::models::commodity::{ActiveModel, Column, Entity as Commodity, Model};

/// Writable commodity fields
#[derive(Debug, Clone, PartialEq)]
pub struct CommodityInput {
    pub area_id: Uuid,
    pub name: String,
    pub short_name: String,
    pub commodity_type: String,
    pub count: i32,
    pub status: String,
    pub original_price: Option<f64>,
    pub original_price_currency: Option<String>,
    pub serial_number: Option<String>,
    pub comments: Option<String>,
    pub draft: bool,
}

impl CommodityInput {
    /// Minimal input used by tests and seeding code.
    pub fn named(area_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            area_id,
            name: name.into(),
            short_name: String::new(),
            commodity_type: "other".to_string(),
            count: 1,
            status: "in_use".to_string(),
            original_price: None,
            original_price_currency: None,
            serial_number: None,
            comments: None,
            draft: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommodityRepository {
    db: DatabaseConnection,
    scope: Scope,
}

impl CommodityRepository {
    pub fn new(db: DatabaseConnection, scope: Scope) -> Self {
        Self { db, scope }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Model>, RepositoryError> {
        let query = Commodity::find_by_id(id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list(&self) -> Result<Vec<Model>, RepositoryError> {
        let query = Commodity::find()
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
        let query = Commodity::find()
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .paginate(&self.db, page_size)
            .fetch_page(page)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list_by_area(&self, area_id: Uuid) -> Result<Vec<Model>, RepositoryError> {
        let query = Commodity::find()
            .filter(Column::AreaId.eq(area_id))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn create(&self, input: CommodityInput) -> Result<Model, RepositoryError> {
        let actor = self.scope.actor().ok_or(RepositoryError::ScopeRequired)?;
        let now = Utc::now().fixed_offset();

        ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            user_id: Set(actor.user_id),
            area_id: Set(input.area_id),
            name: Set(input.name),
            short_name: Set(input.short_name),
            commodity_type: Set(input.commodity_type),
            count: Set(input.count),
            status: Set(input.status),
            original_price: Set(input.original_price),
            original_price_currency: Set(input.original_price_currency),
            serial_number: Set(input.serial_number),
            comments: Set(input.comments),
            draft: Set(input.draft),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn update(&self, id: Uuid, input: CommodityInput) -> Result<Model, RepositoryError> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("commodity {id}")))?;

        let mut active = existing.into_active_model();
        active.area_id = Set(input.area_id);
        active.name = Set(input.name);
        active.short_name = Set(input.short_name);
        active.commodity_type = Set(input.commodity_type);
        active.count = Set(input.count);
        active.status = Set(input.status);
        active.original_price = Set(input.original_price);
        active.original_price_currency = Set(input.original_price_currency);
        active.serial_number = Set(input.serial_number);
        active.comments = Set(input.comments);
        active.draft = Set(input.draft);
        active.updated_at = Set(Utc::now().fixed_offset());
        active
            .update(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn delete_all(&self) -> Result<u64, RepositoryError> {
        let actor = self.scope.actor().ok_or(RepositoryError::ScopeRequired)?;
        let result = Commodity::delete_many()
            .filter(Column::TenantId.eq(actor.tenant_id))
            .filter(Column::UserId.eq(actor.user_id))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }
}
