//! Default catalog: resource types, the full permission matrix and the three
//! stock roles. Safe to run repeatedly; existing rows are reused.

use serde::Serialize;
use utoipa::ToSchema;

use super::SqliteStore;
use crate::authz::ConditionSet;
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{
    codename, Action, Permission, PermissionCreateRequest, ResourceType, ResourceTypeCreateRequest, Role,
    RoleCreateRequest,
};

const RESOURCE_TYPES: [(&str, &str, &str); 5] = [
    ("project", "Project", "Business projects"),
    ("document", "Document", "Documents attached to projects"),
    ("user", "User", "User accounts"),
    ("role", "Role", "Access roles"),
    ("permission", "Permission", "Access permissions"),
];

#[derive(Debug, Serialize, ToSchema)]
pub struct InitializeSummary {
    pub message: String,
    pub created_roles: Vec<String>,
    pub resource_types: usize,
    pub permissions: usize,
}

pub async fn initialize_defaults(store: &SqliteStore) -> AppResult<InitializeSummary> {
    let mut types = Vec::with_capacity(RESOURCE_TYPES.len());
    for (code, name, description) in RESOURCE_TYPES {
        types.push(ensure_resource_type(store, code, name, description).await?);
    }

    let mut permissions = Vec::new();
    for resource_type in &types {
        for action in Action::ALL {
            permissions.push(ensure_permission(store, resource_type, action).await?);
        }
    }

    let admin = ensure_role(store, "admin", "Administrator", "Full access to every function", true).await?;
    let manager = ensure_role(store, "manager", "Manager", "Manages projects and documents", false).await?;
    let user = ensure_role(store, "user", "User", "Basic user", false).await?;

    let business = |p: &&Permission| {
        types
            .iter()
            .filter(|t| t.code == "project" || t.code == "document")
            .any(|t| t.id == p.resource_type_id)
    };

    for permission in &permissions {
        ensure_grant(store, &admin, permission).await?;
    }
    for permission in permissions.iter().filter(business).filter(|p| p.action != Action::Manage) {
        ensure_grant(store, &manager, permission).await?;
    }
    for permission in permissions
        .iter()
        .filter(business)
        .filter(|p| matches!(p.action, Action::View | Action::Create))
    {
        ensure_grant(store, &user, permission).await?;
    }

    tracing::info!(
        resource_types = types.len(),
        permissions = permissions.len(),
        "default catalog initialized"
    );

    Ok(InitializeSummary {
        message: "system initialized".to_string(),
        created_roles: vec![admin.name, manager.name, user.name],
        resource_types: types.len(),
        permissions: permissions.len(),
    })
}

async fn ensure_resource_type(store: &SqliteStore, code: &str, name: &str, description: &str) -> AppResult<ResourceType> {
    let req = ResourceTypeCreateRequest {
        name: name.to_string(),
        code: code.to_string(),
        description: description.to_string(),
    };
    match store.create_resource_type(&req).await {
        Ok(created) => Ok(created),
        Err(AppError::Conflict(_)) => store
            .resource_type_by_code(code)
            .await?
            .ok_or_else(|| AppError::conflict(format!("resource type name '{name}' is taken by another code"))),
        Err(err) => Err(err),
    }
}

async fn ensure_permission(store: &SqliteStore, resource_type: &ResourceType, action: Action) -> AppResult<Permission> {
    let req = PermissionCreateRequest {
        resource_type_id: resource_type.id,
        action,
        name: format!("{} {}", action, resource_type.name.to_lowercase()),
        description: String::new(),
    };
    match store.create_permission(&req).await {
        Ok(created) => Ok(created),
        Err(AppError::Conflict(_)) => {
            let code = codename(action, &resource_type.code);
            store
                .permission_by_codename(&code)
                .await?
                .ok_or_else(|| AppError::conflict(format!("permission slot for '{code}' is taken")))
        }
        Err(err) => Err(err),
    }
}

async fn ensure_role(store: &SqliteStore, code: &str, name: &str, description: &str, is_admin: bool) -> AppResult<Role> {
    let req = RoleCreateRequest {
        name: name.to_string(),
        code: code.to_string(),
        description: description.to_string(),
        is_admin,
    };
    match store.create_role(&req).await {
        Ok(created) => Ok(created),
        Err(AppError::Conflict(_)) => store
            .role_by_code(code)
            .await?
            .ok_or_else(|| AppError::conflict(format!("role name '{name}' is taken by another code"))),
        Err(err) => Err(err),
    }
}

async fn ensure_grant(store: &SqliteStore, role: &Role, permission: &Permission) -> AppResult<()> {
    match store
        .grant_permission_to_role(role.id, permission.id, ConditionSet::empty())
        .await
    {
        Ok(_) | Err(AppError::Conflict(_)) => Ok(()),
        Err(err) => Err(err),
    }
}
