//! # Import Handlers
//!
//! Uploads are gated by the `file-upload` slot of the acting user. The slot
//! is held while the body streams into storage and released once, whatever
//! the outcome.

use axum::{
    body::Body,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use super::types::ExportResponse;
use crate::auth::{Actor, ActorHeaders};
use crate::concurrency::{OPERATION_FILE_UPLOAD, SlotError, acquire};
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// Free-text description stored on the imported export
    pub description: Option<String>,
}

/// Upload an XML archive for validation
#[utoipa::path(
    post,
    path = "/imports",
    security(("bearer_auth" = [])),
    params(ActorHeaders, UploadQuery),
    request_body(content = String, content_type = "application/xml", description = "Inventory archive"),
    responses(
        (status = 201, description = "Upload stored, validation queued", body = ExportResponse),
        (status = 400, description = "Empty or oversized upload", body = ApiError),
        (status = 429, description = "Too many concurrent uploads", body = ApiError,
            headers(("Retry-After" = u64, description = "Seconds to wait before retrying")))
    ),
    tag = "imports"
)]
pub async fn upload_archive(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Query(query): Query<UploadQuery>,
    body: Body,
) -> Result<(StatusCode, Json<ExportResponse>), ApiError> {
    if !state.slots.can_start(actor.user_id, OPERATION_FILE_UPLOAD).await? {
        let status = state.slots.status(actor.user_id, OPERATION_FILE_UPLOAD).await?;
        return Err(SlotError::ResourceLimitExceeded {
            operation: status.operation,
            active: status.active,
            max: status.max,
            retry_after_seconds: status.retry_after_seconds.unwrap_or_default(),
        }
        .into());
    }
    let permit = acquire(&state.slots, actor.user_id, OPERATION_FILE_UPLOAD).await?;

    let stored = state
        .imports()
        .store_upload(actor, body.into_data_stream(), query.description)
        .await;
    permit.release().await;

    Ok((StatusCode::CREATED, Json(stored?.into())))
}
