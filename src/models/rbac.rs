use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{ConditionSet, ResourceScope};
use crate::events::Loggable;

// =============================================================================
// ACTION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Manage,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::View,
        Action::Create,
        Action::Edit,
        Action::Delete,
        Action::Manage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Manage => "manage",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Action::View),
            "create" => Ok(Action::Create),
            "edit" => Ok(Action::Edit),
            "delete" => Ok(Action::Delete),
            "manage" => Ok(Action::Manage),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// Canonical permission codename: `{action}_{resource_type_code}`.
pub fn codename(action: Action, resource_type_code: &str) -> String {
    format!("{}_{}", action, resource_type_code)
}

// =============================================================================
// RESOURCE TYPE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResourceType {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub description: String,
}

impl Loggable for ResourceType {
    fn entity_type() -> &'static str { "resource_type" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResourceTypeCreateRequest {
    #[schema(example = "Project")]
    pub name: String,
    #[schema(example = "project")]
    pub code: String,
    #[serde(default)]
    pub description: String,
}

// =============================================================================
// PERMISSION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    pub codename: String,
    pub name: String,
    pub resource_type_id: Uuid,
    pub action: Action,
    pub description: String,
}

impl Loggable for Permission {
    fn entity_type() -> &'static str { "permission" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    pub resource_type_id: Uuid,
    pub action: Action,
    #[schema(example = "View projects")]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub description: String,
    /// Admin roles bypass permission checks entirely
    pub is_admin: bool,
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "Manager")]
    pub name: String,
    #[schema(example = "manager")]
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_admin: bool,
}

// =============================================================================
// ROLE-PERMISSION GRANT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RolePermission {
    pub id: Uuid,
    pub role_id: Uuid,
    pub permission_id: Uuid,
    #[schema(value_type = Object)]
    pub conditions: ConditionSet,
}

impl Loggable for RolePermission {
    fn entity_type() -> &'static str { "role_permission" }
    fn subject_id(&self) -> Uuid { self.role_id }
}

/// A role grant joined with the permission it refers to.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RoleGrant {
    pub grant: RolePermission,
    pub permission: Permission,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignPermissionToRoleRequest {
    pub permission_id: Uuid,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub conditions: ConditionSet,
}

// =============================================================================
// USER-ROLE ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserRole {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Option<Uuid>,
    #[schema(value_type = Object)]
    pub resource_scope: ResourceScope,
}

impl Loggable for UserRole {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.role_id }
}

/// A role assignment joined with its role.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleAssignment {
    pub assignment: UserRole,
    pub role: Role,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    pub user_id: Uuid,
    pub role_id: Uuid,
    /// e.g. {"resource_types": ["<resource type id>"]}
    #[serde(default)]
    #[schema(value_type = Object)]
    pub resource_scope: ResourceScope,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserRoleQuery {
    pub user_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    pub elevated: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<EffectivePermission>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermission {
    pub codename: String,
    /// Source of the permission: "role" or "direct"
    #[schema(example = "role")]
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}
