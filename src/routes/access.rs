use axum::extract::State;
use axum::Json;

use super::resources::fetch_resource;
use crate::app::AppState;
use crate::authz::PolicyEvaluator;
use crate::errors::{AppError, AppResult};
use crate::jwt::CurrentUser;
use crate::models::resource::{AccessCheckRequest, AccessCheckResponse};

/// Asks the engine about the caller without touching any data.
#[utoipa::path(
    post,
    path = "/api/access/check",
    tag = "Access",
    request_body = AccessCheckRequest,
    responses(
        (status = 200, description = "Decision and the rule that produced it", body = AccessCheckResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Resource not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn check_access(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<AccessCheckRequest>,
) -> AppResult<Json<AccessCheckResponse>> {
    let codename = payload.codename.trim();
    if codename.is_empty() {
        return Err(AppError::bad_request("codename is required"));
    }

    let resource = match payload.resource_id {
        Some(id) => Some(fetch_resource(&state, id).await?.0),
        None => None,
    };

    let decision = state
        .engine
        .decide(&current.user, codename, resource.as_ref())
        .await?;

    Ok(Json(AccessCheckResponse {
        allowed: decision.is_allowed(),
        reason: decision.reason().to_string(),
    }))
}
