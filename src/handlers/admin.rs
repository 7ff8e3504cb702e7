//! # Operator Handlers
//!
//! Service-level views that are not scoped to one user. They require the
//! operator bearer token only.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::types::{ExportListResponse, ExportResponse, TenantListResponse, TenantResponse};
use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::repositories::TenantRepository;
use crate::server::AppState;

/// Every export across tenants, newest first
#[utoipa::path(
    get,
    path = "/admin/exports",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All exports", body = ExportListResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn list_all_exports(
    State(state): State<AppState>,
    _operator: OperatorAuth,
) -> Result<Json<ExportListResponse>, ApiError> {
    let exports = state.exports().list_all().await?;
    Ok(Json(ExportListResponse {
        exports: exports.into_iter().map(ExportResponse::with_owner).collect(),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTenantRequest {
    /// Caller-chosen id; generated when absent
    pub id: Option<Uuid>,
    #[schema(example = "Acme Corp")]
    pub name: Option<String>,
}

/// Register a tenant so its users can own inventory
#[utoipa::path(
    post,
    path = "/admin/tenants",
    security(("bearer_auth" = [])),
    request_body = CreateTenantRequest,
    responses(
        (status = 201, description = "Tenant created", body = TenantResponse),
        (status = 400, description = "Invalid tenant name", body = ApiError),
        (status = 409, description = "Tenant id already taken", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    payload: Result<Json<CreateTenantRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TenantResponse>), ApiError> {
    let Json(request) = payload?;
    let tenant = TenantRepository::new(&state.db)
        .create_tenant(request.id, request.name)
        .await?;
    tracing::info!(tenant_id = %tenant.id, "Tenant created");
    Ok((StatusCode::CREATED, Json(tenant.into())))
}

#[utoipa::path(
    get,
    path = "/admin/tenants",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Registered tenants", body = TenantListResponse)
    ),
    tag = "admin"
)]
pub async fn list_tenants(
    State(state): State<AppState>,
    _operator: OperatorAuth,
) -> Result<Json<TenantListResponse>, ApiError> {
    let tenants = TenantRepository::new(&state.db).list_tenants().await?;
    Ok(Json(TenantListResponse {
        tenants: tenants.into_iter().map(TenantResponse::from).collect(),
    }))
}
