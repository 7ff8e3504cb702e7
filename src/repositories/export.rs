//! # Export Repository
//!
//! Exports are jobs. Status changes driven by workers are conditional
//! updates filtered on the expected current status, so a transition only
//! happens once and terminal rows are never rewritten.

use chrono::{DateTime, Utc};
use sea_orm::prelude::{DateTimeWithTimeZone, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::scope::Scope;
use crate::error::RepositoryError;
use crate::models::export::{
    ActiveModel, Column, Entity as Export, ExportStatus, ExportType, Model, SelectedItem,
};

pub const LEASE_EXPIRED_MESSAGE: &str = "worker lease expired before completion";

/// Values for a new export job
#[derive(Debug, Clone, PartialEq)]
pub struct NewExport {
    pub export_type: ExportType,
    pub include_file_data: bool,
    pub selected_items: Vec<SelectedItem>,
    pub description: String,
    /// Blob already present in storage (uploaded archives)
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
}

/// Entity and attachment tallies for an archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InventoryCounts {
    pub locations: i32,
    pub areas: i32,
    pub commodities: i32,
    pub images: i32,
    pub invoices: i32,
    pub manuals: i32,
    pub binary_data_size: i64,
}

/// Data recorded when an export finishes successfully
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedExport {
    pub file_path: String,
    pub file_id: Option<Uuid>,
    pub file_size: i64,
    pub counts: InventoryCounts,
}

/// Which jobs a worker pool looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportQueue {
    /// Exports generated from the database
    Generated,
    /// Uploaded archives awaiting validation
    Imported,
}

#[derive(Debug, Clone)]
pub struct ExportRepository {
    db: DatabaseConnection,
    scope: Scope,
}

impl ExportRepository {
    pub fn new(db: DatabaseConnection, scope: Scope) -> Self {
        Self { db, scope }
    }

    pub async fn create(&self, input: NewExport) -> Result<Model, RepositoryError> {
        let actor = self.scope.actor().ok_or(RepositoryError::ScopeRequired)?;
        let selected_items = serde_json::to_value(&input.selected_items)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            user_id: Set(actor.user_id),
            export_type: Set(input.export_type),
            include_file_data: Set(input.include_file_data),
            selected_items: Set(selected_items),
            description: Set(input.description),
            status: Set(ExportStatus::Pending),
            file_path: Set(input.file_path),
            file_id: Set(None),
            file_size: Set(input.file_size),
            location_count: Set(0),
            area_count: Set(0),
            commodity_count: Set(0),
            image_count: Set(0),
            invoice_count: Set(0),
            manual_count: Set(0),
            binary_data_size: Set(0),
            error_message: Set(None),
            lease_expires_at: Set(None),
            created_at: Set(Utc::now().fixed_offset()),
            completed_at: Set(None),
            deleted_at: Set(None),
        }
        .insert(&self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    /// Fetches a job. User scopes never see soft-deleted exports.
    pub async fn get(&self, id: Uuid) -> Result<Option<Model>, RepositoryError> {
        let mut query = Export::find_by_id(id);
        if !self.scope.is_service() {
            query = query.filter(Column::DeletedAt.is_null());
        }
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Lists non-deleted exports, newest first.
    pub async fn list(&self) -> Result<Vec<Model>, RepositoryError> {
        let query = Export::find()
            .filter(Column::DeletedAt.is_null())
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Marks a terminal export deleted. Returns false when the row is missing,
    /// already deleted or not terminal.
    pub async fn soft_delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let query = Export::update_many()
            .col_expr(
                Column::DeletedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(Column::Id.eq(id))
            .filter(Column::DeletedAt.is_null())
            .filter(Column::Status.is_in([ExportStatus::Completed, ExportStatus::Failed]));
        let result = self
            .scope
            .restrict(query, Column::TenantId, Column::UserId)
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }

    /// Oldest pending, non-deleted jobs of a queue.
    pub async fn find_pending(
        &self,
        queue: ExportQueue,
        limit: u64,
    ) -> Result<Vec<Model>, RepositoryError> {
        let kind_filter = match queue {
            ExportQueue::Imported => Column::ExportType.eq(ExportType::Imported),
            ExportQueue::Generated => Column::ExportType.ne(ExportType::Imported),
        };
        let query = Export::find()
            .filter(Column::Status.eq(ExportStatus::Pending))
            .filter(Column::DeletedAt.is_null())
            .filter(kind_filter)
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .limit(limit);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Moves a pending job to `in_progress`. Exactly one caller wins.
    pub async fn claim(
        &self,
        id: Uuid,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = Export::update_many()
            .col_expr(Column::Status, Expr::value(ExportStatus::InProgress))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(lease_expires_at.fixed_offset()),
            )
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(ExportStatus::Pending))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }

    pub async fn renew_lease(
        &self,
        id: Uuid,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = Export::update_many()
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(lease_expires_at.fixed_offset()),
            )
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(ExportStatus::InProgress))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }

    pub async fn complete(
        &self,
        id: Uuid,
        outcome: CompletedExport,
    ) -> Result<bool, RepositoryError> {
        let counts = outcome.counts;
        let result = Export::update_many()
            .col_expr(Column::Status, Expr::value(ExportStatus::Completed))
            .col_expr(Column::FilePath, Expr::value(Some(outcome.file_path)))
            .col_expr(Column::FileId, Expr::value(outcome.file_id))
            .col_expr(Column::FileSize, Expr::value(Some(outcome.file_size)))
            .col_expr(Column::LocationCount, Expr::value(counts.locations))
            .col_expr(Column::AreaCount, Expr::value(counts.areas))
            .col_expr(Column::CommodityCount, Expr::value(counts.commodities))
            .col_expr(Column::ImageCount, Expr::value(counts.images))
            .col_expr(Column::InvoiceCount, Expr::value(counts.invoices))
            .col_expr(Column::ManualCount, Expr::value(counts.manuals))
            .col_expr(Column::BinaryDataSize, Expr::value(counts.binary_data_size))
            .col_expr(Column::LeaseExpiresAt, Expr::value(None::<DateTimeWithTimeZone>))
            .col_expr(
                Column::CompletedAt,
                Expr::value(Some(Utc::now().fixed_offset())),
            )
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(ExportStatus::InProgress))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }

    pub async fn fail(&self, id: Uuid, message: &str) -> Result<bool, RepositoryError> {
        let result = Export::update_many()
            .col_expr(Column::Status, Expr::value(ExportStatus::Failed))
            .col_expr(Column::ErrorMessage, Expr::value(Some(message.to_string())))
            .col_expr(Column::LeaseExpiresAt, Expr::value(None::<DateTimeWithTimeZone>))
            .col_expr(
                Column::CompletedAt,
                Expr::value(Some(Utc::now().fixed_offset())),
            )
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(ExportStatus::InProgress))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }

    /// Fails in-progress jobs of a queue whose lease has run out.
    pub async fn reap_expired(
        &self,
        queue: ExportQueue,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let kind_filter = match queue {
            ExportQueue::Imported => Column::ExportType.eq(ExportType::Imported),
            ExportQueue::Generated => Column::ExportType.ne(ExportType::Imported),
        };
        let result = Export::update_many()
            .col_expr(Column::Status, Expr::value(ExportStatus::Failed))
            .col_expr(
                Column::ErrorMessage,
                Expr::value(Some(LEASE_EXPIRED_MESSAGE.to_string())),
            )
            .col_expr(
                Column::CompletedAt,
                Expr::value(Some(now.fixed_offset())),
            )
            .filter(Column::Status.eq(ExportStatus::InProgress))
            .filter(kind_filter)
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
}

