use axum::extract::{Query, State};
use axum::Json;

use super::require_admin;
use crate::app::AppState;
use crate::errors::AppResult;
use crate::jwt::CurrentUser;
use crate::models::audit::{AuditEvent, AuditQuery};

#[utoipa::path(
    get,
    path = "/api/audit",
    tag = "Audit",
    params(
        ("user_id" = Option<Uuid>, Query, description = "Filter by acting user"),
        ("action" = Option<String>, Query, description = "Filter by action kind, e.g. access_granted"),
        ("limit" = Option<i64>, Query, description = "Maximum number of events (default 100)")
    ),
    responses(
        (status = 200, description = "Audit events, newest first", body = [AuditEvent]),
        (status = 403, description = "Not an administrator")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_audit_events(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Vec<AuditEvent>>> {
    require_admin(&state, &current.user).await?;
    Ok(Json(state.audit.list(&query).await?))
}
