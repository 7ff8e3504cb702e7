//! # Response Types
//!
//! JSON shapes returned by the HTTP surface. Entity models stay internal; each
//! response type is built from its model here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::export::{ExportStatus, ExportType, Model as ExportModel, SelectedItem};
use crate::models::restore_operation::{
    Model as RestoreOperationModel, RestoreOptions, RestoreStatus,
};
use crate::models::restore_step::{Model as RestoreStepModel, StepResult};
use crate::models::tenant::Model as TenantModel;

/// Entity and attachment tallies
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CountsDto {
    pub locations: i32,
    pub areas: i32,
    pub commodities: i32,
    pub images: i32,
    pub invoices: i32,
    pub manuals: i32,
    /// Decoded size of embedded file data, in bytes
    pub binary_data_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExportResponse {
    pub id: Uuid,
    pub export_type: ExportType,
    pub status: ExportStatus,
    pub include_file_data: bool,
    pub selected_items: Vec<SelectedItem>,
    pub description: String,
    /// Archive size in bytes, once written
    pub file_size: Option<i64>,
    pub counts: CountsDto,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Present for the service-level listing only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

impl From<ExportModel> for ExportResponse {
    fn from(model: ExportModel) -> Self {
        Self {
            selected_items: model.selected_items(),
            id: model.id,
            export_type: model.export_type,
            status: model.status,
            include_file_data: model.include_file_data,
            description: model.description,
            file_size: model.file_size,
            counts: CountsDto {
                locations: model.location_count,
                areas: model.area_count,
                commodities: model.commodity_count,
                images: model.image_count,
                invoices: model.invoice_count,
                manuals: model.manual_count,
                binary_data_size: model.binary_data_size,
            },
            error_message: model.error_message,
            created_at: model.created_at.with_timezone(&Utc),
            completed_at: model.completed_at.map(|at| at.with_timezone(&Utc)),
            tenant_id: None,
            user_id: None,
        }
    }
}

impl ExportResponse {
    /// Includes the owner, for operator views.
    pub fn with_owner(model: ExportModel) -> Self {
        let (tenant_id, user_id) = (model.tenant_id, model.user_id);
        Self {
            tenant_id: Some(tenant_id),
            user_id: Some(user_id),
            ..Self::from(model)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExportListResponse {
    pub exports: Vec<ExportResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RestoreStepResponse {
    pub position: i32,
    pub name: String,
    pub result: StepResult,
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<RestoreStepModel> for RestoreStepResponse {
    fn from(step: RestoreStepModel) -> Self {
        Self {
            position: step.position,
            name: step.name,
            result: step.result,
            detail: step.detail,
            updated_at: step.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RestoreResponse {
    pub id: Uuid,
    pub export_id: Uuid,
    pub description: String,
    pub options: RestoreOptions,
    pub status: RestoreStatus,
    pub counts: CountsDto,
    /// Steps that ended `failed`
    pub error_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Ordered step log; omitted from listings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<RestoreStepResponse>>,
}

impl From<RestoreOperationModel> for RestoreResponse {
    fn from(model: RestoreOperationModel) -> Self {
        Self {
            options: model.options(),
            id: model.id,
            export_id: model.export_id,
            description: model.description,
            status: model.status,
            counts: CountsDto {
                locations: model.location_count,
                areas: model.area_count,
                commodities: model.commodity_count,
                images: model.image_count,
                invoices: model.invoice_count,
                manuals: model.manual_count,
                binary_data_size: model.binary_data_size,
            },
            error_count: model.error_count,
            error_message: model.error_message,
            created_at: model.created_at.with_timezone(&Utc),
            started_at: model.started_at.map(|at| at.with_timezone(&Utc)),
            completed_at: model.completed_at.map(|at| at.with_timezone(&Utc)),
            steps: None,
        }
    }
}

impl RestoreResponse {
    pub fn with_steps(model: RestoreOperationModel, steps: Vec<RestoreStepModel>) -> Self {
        Self {
            steps: Some(steps.into_iter().map(RestoreStepResponse::from).collect()),
            ..Self::from(model)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RestoreListResponse {
    pub restores: Vec<RestoreResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TenantResponse {
    pub id: Uuid,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<TenantModel> for TenantResponse {
    fn from(model: TenantModel) -> Self {
        Self {
            id: model.id,
            name: model.name,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TenantListResponse {
    pub tenants: Vec<TenantResponse>,
}

/// Database health
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}
