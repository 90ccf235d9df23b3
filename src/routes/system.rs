use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use super::require_admin;
use crate::app::AppState;
use crate::errors::AppResult;
use crate::events::RequestContext;
use crate::jwt::CurrentUser;
use crate::models::audit::AuditAction;
use crate::store::seed::{initialize_defaults, InitializeSummary};

#[utoipa::path(
    post,
    path = "/api/system/initialize",
    tag = "System",
    responses(
        (status = 200, description = "Default resource types, permissions and roles are in place", body = InitializeSummary),
        (status = 403, description = "Not an administrator")
    ),
    security(("bearerAuth" = []))
)]
pub async fn initialize(
    State(state): State<AppState>,
    headers: HeaderMap,
    current: CurrentUser,
) -> AppResult<Json<InitializeSummary>> {
    require_admin(&state, &current.user).await?;
    let summary = initialize_defaults(&state.store).await?;

    state
        .audit
        .record(
            Some(current.user.id),
            AuditAction::Create,
            "system",
            "initialize",
            json!({
                "roles": summary.created_roles,
                "resource_types": summary.resource_types,
                "permissions": summary.permissions,
            }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok(Json(summary))
}
