//! RBAC Admin API Routes
//!
//! Endpoints for managing roles, permissions, resource types, role
//! assignments and direct resource grants. Every route requires an
//! administrator and every change is written to the audit trail.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get},
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;

use super::require_admin;
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::RequestContext;
use crate::jwt::CurrentUser;
use crate::models::audit::AuditAction;
use crate::models::rbac::*;
use crate::models::resource::{GrantAccessRequest, ResourceAccess, ResourceAccessQuery};
use crate::store::PermissionCatalog;
use crate::utils::utc_now;

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        // Roles
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).delete(delete_role))
        .route(
            "/roles/:role_id/permissions",
            get(list_role_permissions).post(assign_permission_to_role),
        )
        .route(
            "/roles/:role_id/permissions/:permission_id",
            delete(revoke_permission_from_role),
        )
        // Catalog
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/resource-types", get(list_resource_types).post(create_resource_type))
        // Role assignments
        .route("/user-roles", get(list_user_roles).post(assign_role))
        .route("/user-roles/:id", delete(revoke_user_role))
        // Direct grants
        .route("/resource-access", get(list_resource_access).post(grant_resource_access))
        .route("/resource-access/:id", delete(revoke_resource_access))
        // Users
        .route("/users/:user_id", delete(delete_user))
        // Effective permissions (computed)
        .route("/users/:user_id/effective-permissions", get(effective_permissions))
}

// =============================================================================
// USER ENDPOINTS
// =============================================================================

/// Permanently delete a user account
///
/// Unlike `DELETE /api/auth/profile`, which only deactivates, this removes the
/// row. The user's assignments and direct grants go with it; audit events stay.
#[utoipa::path(
    delete,
    path = "/api/rbac/users/{user_id}",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "Administrators cannot delete themselves"),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    current: CurrentUser,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_admin(&state, &current.user).await?;
    if user_id == current.user.id {
        return Err(AppError::bad_request("administrators cannot delete their own account"));
    }
    let user = state.store.delete_user(user_id).await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::Delete,
            &user,
            json!({ "email": user.email, "hard_delete": true }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    tracing::info!(user_id = %user.id, deleted_by = %current.user.id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// ROLE ENDPOINTS
// =============================================================================

/// List all roles
#[utoipa::path(
    get,
    path = "/api/rbac/roles",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of roles", body = Vec<Role>),
        (status = 403, description = "Not an administrator"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(State(state): State<AppState>, current: CurrentUser) -> AppResult<Json<Vec<Role>>> {
    require_admin(&state, &current.user).await?;
    Ok(Json(state.store.list_roles().await?))
}

/// Create a new role
#[utoipa::path(
    post,
    path = "/api/rbac/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name or code already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    current: CurrentUser,
    headers: HeaderMap,
    Json(req): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    require_admin(&state, &current.user).await?;
    let role = state.store.create_role(&req).await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::Create,
            &role,
            json!({ "code": role.code, "is_admin": role.is_admin }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(role)))
}

/// Get a role by ID
#[utoipa::path(
    get,
    path = "/api/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role details", body = Role),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Role>> {
    require_admin(&state, &current.user).await?;
    let role = state
        .store
        .role(role_id)
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))?;
    Ok(Json(role))
}

/// Delete a role along with its grants and assignments
#[utoipa::path(
    delete,
    path = "/api/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    current: CurrentUser,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_admin(&state, &current.user).await?;
    let role = state.store.delete_role(role_id).await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::Delete,
            &role,
            json!({ "code": role.code }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Permissions granted to a role, with their conditions
#[utoipa::path(
    get,
    path = "/api/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Grants of the role", body = Vec<RoleGrant>),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_role_permissions(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Vec<RoleGrant>>> {
    require_admin(&state, &current.user).await?;
    if state.store.role(role_id).await?.is_none() {
        return Err(AppError::not_found("role not found"));
    }
    Ok(Json(state.store.grants_of(role_id).await?))
}

/// Grant a permission to a role
#[utoipa::path(
    post,
    path = "/api/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    request_body = AssignPermissionToRoleRequest,
    responses(
        (status = 201, description = "Permission granted", body = RolePermission),
        (status = 404, description = "Role or permission not found"),
        (status = 409, description = "Role already holds the permission"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_permission_to_role(
    State(state): State<AppState>,
    current: CurrentUser,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    Json(req): Json<AssignPermissionToRoleRequest>,
) -> AppResult<(StatusCode, Json<RolePermission>)> {
    require_admin(&state, &current.user).await?;
    let grant = state
        .store
        .grant_permission_to_role(role_id, req.permission_id, req.conditions)
        .await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::AccessGranted,
            &grant,
            json!({ "permission": grant.permission_id, "conditions": grant.conditions.to_json() }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(grant)))
}

/// Remove a permission from a role
#[utoipa::path(
    delete,
    path = "/api/rbac/roles/{role_id}/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses(
        (status = 204, description = "Permission removed from role"),
        (status = 404, description = "Role does not hold the permission"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_permission_from_role(
    State(state): State<AppState>,
    current: CurrentUser,
    headers: HeaderMap,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    require_admin(&state, &current.user).await?;
    let grant = state
        .store
        .revoke_permission_from_role(role_id, permission_id)
        .await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::AccessRevoked,
            &grant,
            json!({ "permission": grant.permission_id }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// CATALOG ENDPOINTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/rbac/permissions",
    tag = "RBAC",
    responses((status = 200, description = "All permissions", body = Vec<Permission>)),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    current: CurrentUser,
) -> AppResult<Json<Vec<Permission>>> {
    require_admin(&state, &current.user).await?;
    Ok(Json(state.store.list_permissions().await?))
}

/// Create a permission; the codename defaults to `{action}_{resource_type_code}`
#[utoipa::path(
    post,
    path = "/api/rbac/permissions",
    tag = "RBAC",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 404, description = "Resource type not found"),
        (status = 409, description = "Codename or (resource type, action) already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    current: CurrentUser,
    headers: HeaderMap,
    Json(req): Json<PermissionCreateRequest>,
) -> AppResult<(StatusCode, Json<Permission>)> {
    require_admin(&state, &current.user).await?;
    let permission = state.store.create_permission(&req).await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::Create,
            &permission,
            json!({ "codename": permission.codename }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(permission)))
}

#[utoipa::path(
    get,
    path = "/api/rbac/resource-types",
    tag = "RBAC",
    responses((status = 200, description = "All resource types", body = Vec<ResourceType>)),
    security(("bearerAuth" = []))
)]
pub async fn list_resource_types(
    State(state): State<AppState>,
    current: CurrentUser,
) -> AppResult<Json<Vec<ResourceType>>> {
    require_admin(&state, &current.user).await?;
    Ok(Json(state.store.list_resource_types().await?))
}

#[utoipa::path(
    post,
    path = "/api/rbac/resource-types",
    tag = "RBAC",
    request_body = ResourceTypeCreateRequest,
    responses(
        (status = 201, description = "Resource type created", body = ResourceType),
        (status = 409, description = "Name or code already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_resource_type(
    State(state): State<AppState>,
    current: CurrentUser,
    headers: HeaderMap,
    Json(req): Json<ResourceTypeCreateRequest>,
) -> AppResult<(StatusCode, Json<ResourceType>)> {
    require_admin(&state, &current.user).await?;
    let resource_type = state.store.create_resource_type(&req).await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::Create,
            &resource_type,
            json!({ "code": resource_type.code }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(resource_type)))
}

// =============================================================================
// ROLE ASSIGNMENTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/rbac/user-roles",
    tag = "RBAC",
    params(
        ("user_id" = Option<Uuid>, Query, description = "Filter by user"),
        ("role_id" = Option<Uuid>, Query, description = "Filter by role"),
    ),
    responses((status = 200, description = "Role assignments", body = Vec<UserRole>)),
    security(("bearerAuth" = []))
)]
pub async fn list_user_roles(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<UserRoleQuery>,
) -> AppResult<Json<Vec<UserRole>>> {
    require_admin(&state, &current.user).await?;
    Ok(Json(state.store.list_user_roles(&query).await?))
}

/// Assign a role to a user, optionally restricted by a resource scope
#[utoipa::path(
    post,
    path = "/api/rbac/user-roles",
    tag = "RBAC",
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned", body = UserRole),
        (status = 404, description = "User or role not found"),
        (status = 409, description = "User already has the role"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_role(
    State(state): State<AppState>,
    current: CurrentUser,
    headers: HeaderMap,
    Json(req): Json<AssignRoleRequest>,
) -> AppResult<(StatusCode, Json<UserRole>)> {
    require_admin(&state, &current.user).await?;
    let assignment = state
        .store
        .assign_role(req.user_id, req.role_id, req.resource_scope, Some(current.user.id))
        .await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::AccessGranted,
            &assignment,
            json!({
                "user": assignment.user_id,
                "role": assignment.role_id,
                "resource_scope": assignment.resource_scope.to_json(),
            }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(assignment)))
}

#[utoipa::path(
    delete,
    path = "/api/rbac/user-roles/{id}",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Role assignment ID")),
    responses(
        (status = 204, description = "Role assignment removed"),
        (status = 404, description = "Role assignment not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_user_role(
    State(state): State<AppState>,
    current: CurrentUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_admin(&state, &current.user).await?;
    let assignment = state.store.revoke_user_role(id).await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::AccessRevoked,
            &assignment,
            json!({ "user": assignment.user_id, "role": assignment.role_id }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// DIRECT GRANTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/rbac/resource-access",
    tag = "RBAC",
    params(
        ("user_id" = Option<Uuid>, Query, description = "Filter by user"),
        ("resource_id" = Option<Uuid>, Query, description = "Filter by resource"),
    ),
    responses((status = 200, description = "Direct grants, expired ones included", body = Vec<ResourceAccess>)),
    security(("bearerAuth" = []))
)]
pub async fn list_resource_access(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<ResourceAccessQuery>,
) -> AppResult<Json<Vec<ResourceAccess>>> {
    require_admin(&state, &current.user).await?;
    Ok(Json(state.store.list_access(&query).await?))
}

/// Grant a user a permission on one resource until `expires_at`
#[utoipa::path(
    post,
    path = "/api/rbac/resource-access",
    tag = "RBAC",
    request_body = GrantAccessRequest,
    responses(
        (status = 201, description = "Access granted", body = ResourceAccess),
        (status = 404, description = "User, resource or permission not found"),
        (status = 409, description = "Grant already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn grant_resource_access(
    State(state): State<AppState>,
    current: CurrentUser,
    headers: HeaderMap,
    Json(req): Json<GrantAccessRequest>,
) -> AppResult<(StatusCode, Json<ResourceAccess>)> {
    require_admin(&state, &current.user).await?;
    let access = state.store.grant_access(&req, Some(current.user.id)).await?;
    let codename = state
        .store
        .permission(access.permission_id)
        .await?
        .map(|p| p.codename)
        .unwrap_or_default();

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::AccessGranted,
            &access,
            json!({
                "user": access.user_id,
                "resource": access.resource_id,
                "permission": codename,
                "expires_at": access.expires_at,
            }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(access)))
}

#[utoipa::path(
    delete,
    path = "/api/rbac/resource-access/{id}",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Direct grant ID")),
    responses(
        (status = 204, description = "Access revoked"),
        (status = 404, description = "Direct grant not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_resource_access(
    State(state): State<AppState>,
    current: CurrentUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_admin(&state, &current.user).await?;
    let access = state.store.revoke_access(id).await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::AccessRevoked,
            &access,
            json!({ "user": access.user_id, "resource": access.resource_id }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// EFFECTIVE PERMISSIONS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/rbac/users/{user_id}/effective-permissions",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Role and direct grants of the user", body = EffectivePermissions),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn effective_permissions(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<EffectivePermissions>> {
    require_admin(&state, &current.user).await?;
    let user = state
        .store
        .user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Json(state.engine.effective_permissions(&user, utc_now()).await?))
}
