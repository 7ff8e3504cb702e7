//! # Concurrency Status Handler

use axum::{
    extract::{Path, State},
    response::Json,
};

use crate::auth::{Actor, ActorHeaders};
use crate::concurrency::SlotStatus;
use crate::error::ApiError;
use crate::server::AppState;

/// Slot usage of the acting user for one operation
#[utoipa::path(
    get,
    path = "/concurrency/{operation}",
    security(("bearer_auth" = [])),
    params(ActorHeaders, ("operation" = String, Path, description = "Operation name, e.g. file-upload")),
    responses(
        (status = 200, description = "Slot status", body = SlotStatus)
    ),
    tag = "concurrency"
)]
pub async fn slot_status(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(operation): Path<String>,
) -> Result<Json<SlotStatus>, ApiError> {
    Ok(Json(state.slots.status(actor.user_id, &operation).await?))
}
