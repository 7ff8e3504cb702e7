//! # Restore Operation Repository

use chrono::{DateTime, Utc};
use sea_orm::prelude::{DateTimeWithTimeZone, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::export::{InventoryCounts, LEASE_EXPIRED_MESSAGE};
use super::scope::Scope;
use crate::error::RepositoryError;
use crate::models::restore_operation::{
    ActiveModel, Column, Entity as RestoreOperation, Model, RestoreOptions, RestoreStatus,
};

/// Progress counters of a running restore
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreProgress {
    pub counts: InventoryCounts,
    pub error_count: i32,
}

#[derive(Debug, Clone)]
pub struct RestoreOperationRepository {
    db: DatabaseConnection,
    scope: Scope,
}

impl RestoreOperationRepository {
    pub fn new(db: DatabaseConnection, scope: Scope) -> Self {
        Self { db, scope }
    }

    pub async fn create(
        &self,
        export_id: Uuid,
        description: String,
        options: &RestoreOptions,
    ) -> Result<Model, RepositoryError> {
        let actor = self.scope.actor().ok_or(RepositoryError::ScopeRequired)?;
        let options = serde_json::to_value(options)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            user_id: Set(actor.user_id),
            export_id: Set(export_id),
            description: Set(description),
            options: Set(options),
            status: Set(RestoreStatus::Pending),
            location_count: Set(0),
            area_count: Set(0),
            commodity_count: Set(0),
            image_count: Set(0),
            invoice_count: Set(0),
            manual_count: Set(0),
            binary_data_size: Set(0),
            error_count: Set(0),
            error_message: Set(None),
            lease_expires_at: Set(None),
            created_at: Set(Utc::now().fixed_offset()),
            started_at: Set(None),
            completed_at: Set(None),
        }
        .insert(&self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Model>, RepositoryError> {
        let query = RestoreOperation::find_by_id(id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list_for_export(&self, export_id: Uuid) -> Result<Vec<Model>, RepositoryError> {
        let query = RestoreOperation::find()
            .filter(Column::ExportId.eq(export_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_pending(&self, limit: u64) -> Result<Vec<Model>, RepositoryError> {
        let query = RestoreOperation::find()
            .filter(Column::Status.eq(RestoreStatus::Pending))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .limit(limit);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Moves a pending operation to `running`. Exactly one caller wins.
    pub async fn claim(
        &self,
        id: Uuid,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let now = Utc::now().fixed_offset();
        let result = RestoreOperation::update_many()
            .col_expr(Column::Status, Expr::value(RestoreStatus::Running))
            .col_expr(Column::StartedAt, Expr::value(Some(now)))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Some(lease_expires_at.fixed_offset())),
            )
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(RestoreStatus::Pending))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }

    /// Persists counters and pushes the lease forward in one write.
    pub async fn record_progress(
        &self,
        id: Uuid,
        progress: RestoreProgress,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let query = Self::with_progress(RestoreOperation::update_many(), progress)
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Some(lease_expires_at.fixed_offset())),
            )
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(RestoreStatus::Running));
        let result = query
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }

    pub async fn complete(
        &self,
        id: Uuid,
        progress: RestoreProgress,
    ) -> Result<bool, RepositoryError> {
        let query = Self::with_progress(RestoreOperation::update_many(), progress)
            .col_expr(Column::Status, Expr::value(RestoreStatus::Completed))
            .col_expr(Column::LeaseExpiresAt, Expr::value(None::<DateTimeWithTimeZone>))
            .col_expr(
                Column::CompletedAt,
                Expr::value(Some(Utc::now().fixed_offset())),
            )
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(RestoreStatus::Running));
        let result = query
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }

    pub async fn fail(&self, id: Uuid, message: &str) -> Result<bool, RepositoryError> {
        let result = RestoreOperation::update_many()
            .col_expr(Column::Status, Expr::value(RestoreStatus::Failed))
            .col_expr(Column::ErrorMessage, Expr::value(Some(message.to_string())))
            .col_expr(Column::LeaseExpiresAt, Expr::value(None::<DateTimeWithTimeZone>))
            .col_expr(
                Column::CompletedAt,
                Expr::value(Some(Utc::now().fixed_offset())),
            )
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(RestoreStatus::Running))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }

    pub async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = RestoreOperation::update_many()
            .col_expr(Column::Status, Expr::value(RestoreStatus::Failed))
            .col_expr(
                Column::ErrorMessage,
                Expr::value(Some(LEASE_EXPIRED_MESSAGE.to_string())),
            )
            .col_expr(Column::CompletedAt, Expr::value(Some(now.fixed_offset())))
            .filter(Column::Status.eq(RestoreStatus::Running))
            .filter(
                Condition::any()
                    .add(Column::LeaseExpiresAt.is_null())
                    .add(Column::LeaseExpiresAt.lt(now.fixed_offset())),
            )
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }

    fn with_progress(
        query: sea_orm::UpdateMany<RestoreOperation>,
        progress: RestoreProgress,
    ) -> sea_orm::UpdateMany<RestoreOperation> {
        let counts = progress.counts;
        query
            .col_expr(Column::LocationCount, Expr::value(counts.locations))
            .col_expr(Column::AreaCount, Expr::value(counts.areas))
            .col_expr(Column::CommodityCount, Expr::value(counts.commodities))
            .col_expr(Column::ImageCount, Expr::value(counts.images))
            .col_expr(Column::InvoiceCount, Expr::value(counts.invoices))
            .col_expr(Column::ManualCount, Expr::value(counts.manuals))
            .col_expr(Column::BinaryDataSize, Expr::value(counts.binary_data_size))
            .col_expr(Column::ErrorCount, Expr::value(progress.error_count))
    }
}
