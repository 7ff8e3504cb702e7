//! # Restore Handlers

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use super::types::{RestoreListResponse, RestoreResponse};
use crate::auth::{Actor, ActorHeaders};
use crate::error::ApiError;
use crate::restore::CreateRestoreRequest;
use crate::server::AppState;

/// Queue a restore of a completed export into the acting user's inventory
#[utoipa::path(
    post,
    path = "/exports/{id}/restores",
    security(("bearer_auth" = [])),
    params(ActorHeaders, ("id" = Uuid, Path, description = "Source export id")),
    request_body = CreateRestoreRequest,
    responses(
        (status = 201, description = "Restore queued", body = RestoreResponse),
        (status = 404, description = "Export not found or access denied", body = ApiError),
        (status = 409, description = "Export is not a completed archive", body = ApiError)
    ),
    tag = "restores"
)]
pub async fn create_restore(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(export_id): Path<Uuid>,
    payload: Result<Json<CreateRestoreRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RestoreResponse>), ApiError> {
    let Json(request) = payload?;
    let operation = state
        .restores()
        .create_restore(actor, export_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(operation.into())))
}

#[utoipa::path(
    get,
    path = "/exports/{id}/restores",
    security(("bearer_auth" = [])),
    params(ActorHeaders, ("id" = Uuid, Path, description = "Source export id")),
    responses(
        (status = 200, description = "Restores of the export", body = RestoreListResponse),
        (status = 404, description = "Export not found or access denied", body = ApiError)
    ),
    tag = "restores"
)]
pub async fn list_restores(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(export_id): Path<Uuid>,
) -> Result<Json<RestoreListResponse>, ApiError> {
    let operations = state.restores().list_restores(actor, export_id).await?;
    Ok(Json(RestoreListResponse {
        restores: operations.into_iter().map(RestoreResponse::from).collect(),
    }))
}

/// Restore operation with its ordered steps
#[utoipa::path(
    get,
    path = "/restores/{id}",
    security(("bearer_auth" = [])),
    params(ActorHeaders, ("id" = Uuid, Path, description = "Restore operation id")),
    responses(
        (status = 200, description = "Restore operation", body = RestoreResponse),
        (status = 404, description = "Restore not found or access denied", body = ApiError)
    ),
    tag = "restores"
)]
pub async fn get_restore(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<RestoreResponse>, ApiError> {
    let (operation, steps) = state.restores().get_restore(actor, id).await?;
    Ok(Json(RestoreResponse::with_steps(operation, steps)))
}
