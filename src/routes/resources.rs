use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::PolicyEvaluator;
use crate::errors::{AppError, AppResult};
use crate::events::RequestContext;
use crate::jwt::CurrentUser;
use crate::models::audit::AuditAction;
use crate::models::rbac::{codename, Action, ResourceType};
use crate::models::resource::{Resource, ResourceCreateRequest, ResourceUpdateRequest};
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/api/resources",
    tag = "Resources",
    responses(
        (status = 200, description = "Resources visible to the caller", body = [Resource]),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_resources(State(state): State<AppState>, current: CurrentUser) -> AppResult<Json<Vec<Resource>>> {
    if !current.user.is_active {
        return Ok(Json(Vec::new()));
    }
    let see_all = state.engine.is_admin(&current.user).await?;
    let resources = state
        .store
        .visible_resources(current.user.id, see_all, utc_now())
        .await?;
    Ok(Json(resources))
}

#[utoipa::path(
    get,
    path = "/api/resources/{id}",
    tag = "Resources",
    params(("id" = Uuid, Path, description = "Resource id")),
    responses(
        (status = 200, description = "Resource detail", body = Resource),
        (status = 403, description = "Missing view permission"),
        (status = 404, description = "Resource not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Resource>> {
    let (resource, resource_type) = fetch_resource(&state, id).await?;
    state
        .engine
        .require(&current.user, &codename(Action::View, &resource_type.code), Some(&resource))
        .await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::View,
            &resource,
            json!({ "resource_type": resource_type.code }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok(Json(resource))
}

#[utoipa::path(
    post,
    path = "/api/resources",
    tag = "Resources",
    request_body = ResourceCreateRequest,
    responses(
        (status = 201, description = "Resource created, caller is the owner", body = Resource),
        (status = 400, description = "Unknown resource type or invalid payload"),
        (status = 403, description = "Missing create permission")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    current: CurrentUser,
    Json(payload): Json<ResourceCreateRequest>,
) -> AppResult<(StatusCode, Json<Resource>)> {
    let resource_type = state
        .store
        .resource_type(payload.resource_type_id)
        .await?
        .ok_or_else(|| AppError::bad_request("unknown resource type"))?;

    state
        .engine
        .require(&current.user, &codename(Action::Create, &resource_type.code), None)
        .await?;

    let resource = state.store.create_resource(current.user.id, &payload).await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::Create,
            &resource,
            json!({ "resource_type": resource_type.code, "name": resource.name }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(resource)))
}

#[utoipa::path(
    put,
    path = "/api/resources/{id}",
    tag = "Resources",
    params(("id" = Uuid, Path, description = "Resource id")),
    request_body = ResourceUpdateRequest,
    responses(
        (status = 200, description = "Resource updated", body = Resource),
        (status = 403, description = "Neither owner nor holder of the edit permission"),
        (status = 404, description = "Resource not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ResourceUpdateRequest>,
) -> AppResult<Json<Resource>> {
    let (resource, resource_type) = fetch_resource(&state, id).await?;
    state
        .engine
        .require(&current.user, &codename(Action::Edit, &resource_type.code), Some(&resource))
        .await?;

    let updated = state.store.update_resource(id, &payload).await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::Update,
            &updated,
            json!({ "updated_fields": payload.updated_fields() }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/api/resources/{id}",
    tag = "Resources",
    params(("id" = Uuid, Path, description = "Resource id")),
    responses(
        (status = 204, description = "Resource deleted"),
        (status = 403, description = "Neither owner nor holder of the delete permission"),
        (status = 404, description = "Resource not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let (resource, resource_type) = fetch_resource(&state, id).await?;
    state
        .engine
        .require(&current.user, &codename(Action::Delete, &resource_type.code), Some(&resource))
        .await?;

    state.store.delete_resource(id).await?;

    state
        .audit
        .record_entity(
            Some(current.user.id),
            AuditAction::Delete,
            &resource,
            json!({ "resource_type": resource_type.code, "name": resource.name }),
            Some(&RequestContext::from_headers(&headers)),
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn fetch_resource(state: &AppState, id: Uuid) -> AppResult<(Resource, ResourceType)> {
    let resource = state
        .store
        .resource(id)
        .await?
        .ok_or_else(|| AppError::not_found("resource not found"))?;
    let resource_type = state
        .store
        .resource_type(resource.resource_type_id)
        .await?
        .ok_or_else(|| AppError::internal("resource has no resource type"))?;
    Ok((resource, resource_type))
}
