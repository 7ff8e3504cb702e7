//! # Export Handlers

use axum::{
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::types::{ExportListResponse, ExportResponse};
use crate::auth::{Actor, ActorHeaders};
use crate::error::ApiError;
use crate::export::CreateExportRequest;
use crate::server::AppState;

/// Queue an export of the acting user's inventory
#[utoipa::path(
    post,
    path = "/exports",
    security(("bearer_auth" = [])),
    params(ActorHeaders),
    request_body = CreateExportRequest,
    responses(
        (status = 201, description = "Export queued", body = ExportResponse),
        (status = 400, description = "Invalid export request", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "exports"
)]
pub async fn create_export(
    State(state): State<AppState>,
    Actor(actor): Actor,
    payload: Result<Json<CreateExportRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ExportResponse>), ApiError> {
    let Json(request) = payload?;
    let export = state.exports().create_export(actor, request).await?;
    Ok((StatusCode::CREATED, Json(export.into())))
}

/// List the acting user's exports, newest first
#[utoipa::path(
    get,
    path = "/exports",
    security(("bearer_auth" = [])),
    params(ActorHeaders),
    responses(
        (status = 200, description = "Exports of the acting user", body = ExportListResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "exports"
)]
pub async fn list_exports(
    State(state): State<AppState>,
    Actor(actor): Actor,
) -> Result<Json<ExportListResponse>, ApiError> {
    let exports = state.exports().list(actor).await?;
    Ok(Json(ExportListResponse {
        exports: exports.into_iter().map(ExportResponse::from).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/exports/{id}",
    security(("bearer_auth" = [])),
    params(ActorHeaders, ("id" = Uuid, Path, description = "Export id")),
    responses(
        (status = 200, description = "Export status", body = ExportResponse),
        (status = 404, description = "Export not found or access denied", body = ApiError)
    ),
    tag = "exports"
)]
pub async fn get_export(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<ExportResponse>, ApiError> {
    let export = state.exports().get(actor, id).await?;
    Ok(Json(export.into()))
}

/// Soft-delete a finished export
#[utoipa::path(
    delete,
    path = "/exports/{id}",
    security(("bearer_auth" = [])),
    params(ActorHeaders, ("id" = Uuid, Path, description = "Export id")),
    responses(
        (status = 204, description = "Export deleted"),
        (status = 404, description = "Export not found or access denied", body = ApiError),
        (status = 409, description = "Export still pending or in progress", body = ApiError)
    ),
    tag = "exports"
)]
pub async fn delete_export(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.exports().soft_delete(actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream the archive of a completed export
#[utoipa::path(
    get,
    path = "/exports/{id}/download",
    security(("bearer_auth" = [])),
    params(ActorHeaders, ("id" = Uuid, Path, description = "Export id")),
    responses(
        (status = 200, description = "XML archive", content_type = "application/xml"),
        (status = 404, description = "Export not found or access denied", body = ApiError),
        (status = 409, description = "Export not completed", body = ApiError)
    ),
    tag = "exports"
)]
pub async fn download_export(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let download = state.exports().open_download(actor, id).await?;

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        download.file_name.replace('"', "")
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let body = Body::from_stream(ReaderStream::new(download.reader));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/xml")),
            (header::CONTENT_LENGTH, HeaderValue::from(download.size)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
