//! # Tenant Repository

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::tenant::{
    ActiveModel as TenantActiveModel, Entity as Tenant, Model as TenantModel,
};

/// Repository for Tenant database operations
pub struct TenantRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> TenantRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a tenant, optionally with a caller-chosen id
    pub async fn create_tenant(
        &self,
        id: Option<Uuid>,
        name: Option<String>,
    ) -> Result<TenantModel, RepositoryError> {
        if let Some(name) = &name
            && (name.trim().is_empty() || name.len() > 255)
        {
            return Err(RepositoryError::Validation(
                "tenant name must be 1-255 characters".to_string(),
            ));
        }

        TenantActiveModel {
            id: Set(id.unwrap_or_else(Uuid::new_v4)),
            name: Set(name.map(|n| n.trim().to_string())),
            created_at: Set(Utc::now().into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn get_tenant_by_id(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantModel>, RepositoryError> {
        Tenant::find_by_id(tenant_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list_tenants(&self) -> Result<Vec<TenantModel>, RepositoryError> {
        Tenant::find()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
