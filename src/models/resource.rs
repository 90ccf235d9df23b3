use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::ConditionSet;
use crate::events::Loggable;
use crate::models::rbac::Permission;

// =============================================================================
// RESOURCE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Resource {
    pub id: Uuid,
    pub resource_type_id: Uuid,
    pub name: String,
    pub description: String,
    /// The owner always has full access to the resource
    pub owner_id: Uuid,
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Resource {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }
}

impl Loggable for Resource {
    fn entity_type() -> &'static str { "resource" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResourceCreateRequest {
    pub resource_type_id: Uuid,
    #[schema(example = "Alpha")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ResourceUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
    pub is_active: Option<bool>,
}

impl ResourceUpdateRequest {
    pub fn updated_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.metadata.is_some() {
            fields.push("metadata");
        }
        if self.is_active.is_some() {
            fields.push("is_active");
        }
        fields
    }
}

// =============================================================================
// DIRECT GRANT (resource access)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResourceAccess {
    pub id: Uuid,
    pub user_id: Uuid,
    pub resource_id: Uuid,
    pub permission_id: Uuid,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Option<Uuid>,
    #[schema(value_type = Object)]
    pub conditions: ConditionSet,
    pub expires_at: DateTime<Utc>,
}

impl ResourceAccess {
    /// Expired once `now` is strictly past `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

impl Loggable for ResourceAccess {
    fn entity_type() -> &'static str { "resource_access" }
    fn subject_id(&self) -> Uuid { self.id }
}

/// A direct grant joined with the permission it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectGrant {
    pub access: ResourceAccess,
    pub permission: Permission,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantAccessRequest {
    pub user_id: Uuid,
    pub resource_id: Uuid,
    pub permission_id: Uuid,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub conditions: ConditionSet,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourceAccessQuery {
    pub user_id: Option<Uuid>,
    pub resource_id: Option<Uuid>,
}

// =============================================================================
// ACCESS CHECK
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct AccessCheckRequest {
    #[schema(example = "view_project")]
    pub codename: String,
    pub resource_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AccessCheckResponse {
    pub allowed: bool,
    #[schema(example = "role_grant")]
    pub reason: String,
}
