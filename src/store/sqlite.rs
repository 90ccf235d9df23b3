use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{DirectGrantStore, IdentityStore, PermissionCatalog};
use crate::authz::{ConditionSet, ResourceScope};
use crate::db::row_parsers::{
    db_user_from_row, fmt_datetime, permission_from_row, permission_from_row_prefixed,
    resource_access_from_row, resource_from_row, resource_type_from_row, role_from_row,
    role_from_row_prefixed, role_permission_from_row, user_role_from_row,
};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{
    codename, Permission, PermissionCreateRequest, ResourceType, ResourceTypeCreateRequest, Role,
    RoleAssignment, RoleCreateRequest, RoleGrant, RolePermission, UserRole, UserRoleQuery,
};
use crate::models::resource::{
    DirectGrant, GrantAccessRequest, Resource, ResourceAccess, ResourceAccessQuery,
    ResourceCreateRequest, ResourceUpdateRequest,
};
use crate::models::user::{DbUser, NewUser, ProfileUpdateRequest, User};
use crate::utils::utc_now;

const USER_COLUMNS: &str = "id, email, first_name, last_name, patronymic, password_hash, is_active, is_staff, is_superuser, date_joined, last_login";
const RESOURCE_COLUMNS: &str = "id, resource_type_id, name, description, owner_id, metadata, created_at, updated_at, is_active";
const ACCESS_COLUMNS: &str = "id, user_id, resource_id, permission_id, granted_at, granted_by, conditions, expires_at";
const PERMISSION_COLUMNS: &str = "id, codename, name, resource_type_id, action, description";
const PERMISSION_ALIASED: &str = "p.id AS p_id, p.codename AS p_codename, p.name AS p_name, p.resource_type_id AS p_resource_type_id, p.action AS p_action, p.description AS p_description";

/// The production access store on top of the SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---------------------------------------------------------------------
    // users
    // ---------------------------------------------------------------------

    pub async fn create_user(&self, new_user: NewUser) -> AppResult<User> {
        let id = Uuid::new_v4();
        let now = utc_now();

        let result = sqlx::query(
            "INSERT INTO users (id, email, first_name, last_name, patronymic, password_hash, is_active, is_staff, is_superuser, date_joined) \
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(id.to_string())
        .bind(&new_user.email)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.patronymic)
        .bind(&new_user.password_hash)
        .bind(new_user.is_staff)
        .bind(new_user.is_superuser)
        .bind(fmt_datetime(now))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict("email already registered"));
        }

        self.user_by_id(id)
            .await?
            .ok_or_else(|| AppError::internal("user vanished after insert"))
    }

    pub async fn user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| db_user_from_row(&r).map(User::from)).transpose()
    }

    pub async fn user_by_email(&self, email: &str) -> AppResult<Option<DbUser>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| db_user_from_row(&r)).transpose()
    }

    pub async fn update_profile(&self, id: Uuid, update: &ProfileUpdateRequest) -> AppResult<User> {
        let mut user = self
            .user_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("user not found"))?;

        if let Some(first_name) = update.first_name.as_ref() {
            user.first_name = first_name.clone();
        }
        if let Some(last_name) = update.last_name.as_ref() {
            user.last_name = last_name.clone();
        }
        if let Some(patronymic) = update.patronymic.as_ref() {
            user.patronymic = patronymic.clone();
        }

        sqlx::query("UPDATE users SET first_name = ?, last_name = ?, patronymic = ? WHERE id = ?")
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.patronymic)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(fmt_datetime(at))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Soft delete: the row stays so audit events keep their user.
    pub async fn deactivate_user(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET is_active = 0 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("user not found"));
        }
        Ok(())
    }

    /// Hard delete, returning the removed account. Role assignments and direct
    /// grants cascade; audit events of the user survive with a null user.
    pub async fn delete_user(&self, id: Uuid) -> AppResult<User> {
        let user = self
            .user_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("user not found"))?;
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("user not found"));
        }
        Ok(user)
    }

    // ---------------------------------------------------------------------
    // roles
    // ---------------------------------------------------------------------

    pub async fn create_role(&self, req: &RoleCreateRequest) -> AppResult<Role> {
        if req.name.trim().is_empty() || req.code.trim().is_empty() {
            return Err(AppError::bad_request("role name and code are required"));
        }
        let role = Role {
            id: Uuid::new_v4(),
            name: req.name.trim().to_string(),
            code: req.code.trim().to_string(),
            description: req.description.clone(),
            is_admin: req.is_admin,
        };

        let result = sqlx::query(
            "INSERT INTO roles (id, name, code, description, is_admin) VALUES (?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(role.id.to_string())
        .bind(&role.name)
        .bind(&role.code)
        .bind(&role.description)
        .bind(role.is_admin)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict(format!("role '{}' already exists", role.code)));
        }
        Ok(role)
    }

    pub async fn role(&self, id: Uuid) -> AppResult<Option<Role>> {
        let row = sqlx::query("SELECT id, name, code, description, is_admin FROM roles WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| role_from_row(&r)).transpose()
    }

    pub async fn role_by_code(&self, code: &str) -> AppResult<Option<Role>> {
        let row = sqlx::query("SELECT id, name, code, description, is_admin FROM roles WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| role_from_row(&r)).transpose()
    }

    pub async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let rows = sqlx::query("SELECT id, name, code, description, is_admin FROM roles ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(role_from_row).collect()
    }

    pub async fn delete_role(&self, id: Uuid) -> AppResult<Role> {
        let role = self
            .role(id)
            .await?
            .ok_or_else(|| AppError::not_found("role not found"))?;
        sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(role)
    }

    // ---------------------------------------------------------------------
    // resource types
    // ---------------------------------------------------------------------

    pub async fn create_resource_type(&self, req: &ResourceTypeCreateRequest) -> AppResult<ResourceType> {
        if req.name.trim().is_empty() || req.code.trim().is_empty() {
            return Err(AppError::bad_request("resource type name and code are required"));
        }
        let resource_type = ResourceType {
            id: Uuid::new_v4(),
            name: req.name.trim().to_string(),
            code: req.code.trim().to_string(),
            description: req.description.clone(),
        };

        let result = sqlx::query(
            "INSERT INTO resource_types (id, name, code, description) VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(resource_type.id.to_string())
        .bind(&resource_type.name)
        .bind(&resource_type.code)
        .bind(&resource_type.description)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict(format!(
                "resource type '{}' already exists",
                resource_type.code
            )));
        }
        Ok(resource_type)
    }

    pub async fn list_resource_types(&self) -> AppResult<Vec<ResourceType>> {
        let rows = sqlx::query("SELECT id, name, code, description FROM resource_types ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(resource_type_from_row).collect()
    }

    pub async fn resource_type(&self, id: Uuid) -> AppResult<Option<ResourceType>> {
        let row = sqlx::query("SELECT id, name, code, description FROM resource_types WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| resource_type_from_row(&r)).transpose()
    }

    pub async fn resource_type_by_code(&self, code: &str) -> AppResult<Option<ResourceType>> {
        let row = sqlx::query("SELECT id, name, code, description FROM resource_types WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| resource_type_from_row(&r)).transpose()
    }

    // ---------------------------------------------------------------------
    // permissions
    // ---------------------------------------------------------------------

    /// Creates a permission. The codename is always `{action}_{type code}`.
    pub async fn create_permission(&self, req: &PermissionCreateRequest) -> AppResult<Permission> {
        let resource_type = self
            .resource_type(req.resource_type_id)
            .await?
            .ok_or_else(|| AppError::not_found("resource type not found"))?;

        let permission = Permission {
            id: Uuid::new_v4(),
            codename: codename(req.action, &resource_type.code),
            name: req.name.clone(),
            resource_type_id: resource_type.id,
            action: req.action,
            description: req.description.clone(),
        };

        let result = sqlx::query(
            "INSERT INTO permissions (id, codename, name, resource_type_id, action, description) VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(permission.id.to_string())
        .bind(&permission.codename)
        .bind(&permission.name)
        .bind(permission.resource_type_id.to_string())
        .bind(permission.action.as_str())
        .bind(&permission.description)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict(format!(
                "permission '{}' already exists",
                permission.codename
            )));
        }
        Ok(permission)
    }

    pub async fn list_permissions(&self) -> AppResult<Vec<Permission>> {
        let rows = sqlx::query(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY codename"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(permission_from_row).collect()
    }

    pub async fn permission(&self, id: Uuid) -> AppResult<Option<Permission>> {
        let row = sqlx::query(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| permission_from_row(&r)).transpose()
    }

    pub async fn permission_by_codename(&self, codename: &str) -> AppResult<Option<Permission>> {
        let row = sqlx::query(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE codename = ?"))
            .bind(codename)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| permission_from_row(&r)).transpose()
    }

    // ---------------------------------------------------------------------
    // role grants
    // ---------------------------------------------------------------------

    pub async fn grant_permission_to_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        conditions: ConditionSet,
    ) -> AppResult<RolePermission> {
        if self.role(role_id).await?.is_none() {
            return Err(AppError::not_found("role not found"));
        }
        if self.permission(permission_id).await?.is_none() {
            return Err(AppError::not_found("permission not found"));
        }

        let grant = RolePermission {
            id: Uuid::new_v4(),
            role_id,
            permission_id,
            conditions,
        };

        let result = sqlx::query(
            "INSERT INTO role_permissions (id, role_id, permission_id, conditions) VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(grant.id.to_string())
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .bind(grant.conditions.to_json().to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict("role already holds this permission"));
        }
        Ok(grant)
    }

    pub async fn revoke_permission_from_role(&self, role_id: Uuid, permission_id: Uuid) -> AppResult<RolePermission> {
        let row = sqlx::query(
            "SELECT id, role_id, permission_id, conditions FROM role_permissions WHERE role_id = ? AND permission_id = ?",
        )
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("role does not hold this permission"))?;
        let grant = role_permission_from_row(&row)?;

        sqlx::query("DELETE FROM role_permissions WHERE id = ?")
            .bind(grant.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(grant)
    }

    // ---------------------------------------------------------------------
    // role assignments
    // ---------------------------------------------------------------------

    pub async fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        resource_scope: ResourceScope,
        assigned_by: Option<Uuid>,
    ) -> AppResult<UserRole> {
        if self.user_by_id(user_id).await?.is_none() {
            return Err(AppError::not_found("user not found"));
        }
        if self.role(role_id).await?.is_none() {
            return Err(AppError::not_found("role not found"));
        }

        let assignment = UserRole {
            id: Uuid::new_v4(),
            user_id,
            role_id,
            assigned_at: utc_now(),
            assigned_by,
            resource_scope,
        };

        let result = sqlx::query(
            "INSERT INTO user_roles (id, user_id, role_id, assigned_at, assigned_by, resource_scope) VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(assignment.id.to_string())
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .bind(fmt_datetime(assignment.assigned_at))
        .bind(assigned_by.map(|id| id.to_string()))
        .bind(assignment.resource_scope.to_json().to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict("user already has this role"));
        }
        Ok(assignment)
    }

    pub async fn list_user_roles(&self, query: &UserRoleQuery) -> AppResult<Vec<UserRole>> {
        let rows = sqlx::query(
            "SELECT id, user_id, role_id, assigned_at, assigned_by, resource_scope FROM user_roles \
             WHERE (?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR role_id = ?2) ORDER BY assigned_at",
        )
        .bind(query.user_id.map(|id| id.to_string()))
        .bind(query.role_id.map(|id| id.to_string()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_role_from_row).collect()
    }

    pub async fn revoke_user_role(&self, id: Uuid) -> AppResult<UserRole> {
        let row = sqlx::query(
            "SELECT id, user_id, role_id, assigned_at, assigned_by, resource_scope FROM user_roles WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("role assignment not found"))?;
        let assignment = user_role_from_row(&row)?;

        sqlx::query("DELETE FROM user_roles WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(assignment)
    }

    // ---------------------------------------------------------------------
    // resources
    // ---------------------------------------------------------------------

    pub async fn create_resource(&self, owner_id: Uuid, req: &ResourceCreateRequest) -> AppResult<Resource> {
        if req.name.trim().is_empty() {
            return Err(AppError::bad_request("resource name is required"));
        }
        let metadata = req.metadata.clone().unwrap_or_else(|| Value::Object(Default::default()));
        if !metadata.is_object() {
            return Err(AppError::bad_request("metadata must be a JSON object"));
        }

        let now = utc_now();
        let resource = Resource {
            id: Uuid::new_v4(),
            resource_type_id: req.resource_type_id,
            name: req.name.trim().to_string(),
            description: req.description.clone(),
            owner_id,
            metadata,
            created_at: now,
            updated_at: now,
            is_active: true,
        };

        sqlx::query(
            "INSERT INTO resources (id, resource_type_id, name, description, owner_id, metadata, created_at, updated_at, is_active) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(resource.id.to_string())
        .bind(resource.resource_type_id.to_string())
        .bind(&resource.name)
        .bind(&resource.description)
        .bind(owner_id.to_string())
        .bind(resource.metadata.to_string())
        .bind(fmt_datetime(now))
        .bind(fmt_datetime(now))
        .execute(&self.pool)
        .await?;

        Ok(resource)
    }

    pub async fn resource(&self, id: Uuid) -> AppResult<Option<Resource>> {
        let row = sqlx::query(&format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| resource_from_row(&r)).transpose()
    }

    /// Every resource when `see_all`, otherwise owned resources plus those the
    /// user holds a direct grant on that has not expired at `now`.
    pub async fn visible_resources(&self, user_id: Uuid, see_all: bool, now: DateTime<Utc>) -> AppResult<Vec<Resource>> {
        let rows = if see_all {
            sqlx::query(&format!("SELECT {RESOURCE_COLUMNS} FROM resources ORDER BY created_at DESC"))
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query(&format!(
                "SELECT {RESOURCE_COLUMNS} FROM resources WHERE owner_id = ?1 OR id IN \
                 (SELECT resource_id FROM resource_access WHERE user_id = ?1 AND expires_at >= ?2) \
                 ORDER BY created_at DESC"
            ))
            .bind(user_id.to_string())
            .bind(fmt_datetime(now))
            .fetch_all(&self.pool)
            .await?
        };
        rows.iter().map(resource_from_row).collect()
    }

    pub async fn update_resource(&self, id: Uuid, update: &ResourceUpdateRequest) -> AppResult<Resource> {
        let mut resource = self
            .resource(id)
            .await?
            .ok_or_else(|| AppError::not_found("resource not found"))?;

        if let Some(name) = update.name.as_ref() {
            if name.trim().is_empty() {
                return Err(AppError::bad_request("resource name cannot be empty"));
            }
            resource.name = name.trim().to_string();
        }
        if let Some(description) = update.description.as_ref() {
            resource.description = description.clone();
        }
        if let Some(metadata) = update.metadata.as_ref() {
            if !metadata.is_object() {
                return Err(AppError::bad_request("metadata must be a JSON object"));
            }
            resource.metadata = metadata.clone();
        }
        if let Some(is_active) = update.is_active {
            resource.is_active = is_active;
        }
        resource.updated_at = utc_now();

        sqlx::query(
            "UPDATE resources SET name = ?, description = ?, metadata = ?, is_active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&resource.name)
        .bind(&resource.description)
        .bind(resource.metadata.to_string())
        .bind(resource.is_active)
        .bind(fmt_datetime(resource.updated_at))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(resource)
    }

    pub async fn delete_resource(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("resource not found"));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // direct grants
    // ---------------------------------------------------------------------

    pub async fn grant_access(&self, req: &GrantAccessRequest, granted_by: Option<Uuid>) -> AppResult<ResourceAccess> {
        if self.user_by_id(req.user_id).await?.is_none() {
            return Err(AppError::not_found("user not found"));
        }
        if self.resource(req.resource_id).await?.is_none() {
            return Err(AppError::not_found("resource not found"));
        }
        if self.permission(req.permission_id).await?.is_none() {
            return Err(AppError::not_found("permission not found"));
        }

        let access = ResourceAccess {
            id: Uuid::new_v4(),
            user_id: req.user_id,
            resource_id: req.resource_id,
            permission_id: req.permission_id,
            granted_at: utc_now(),
            granted_by,
            conditions: req.conditions.clone(),
            expires_at: req.expires_at,
        };

        let result = sqlx::query(&format!(
            "INSERT INTO resource_access ({ACCESS_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING"
        ))
        .bind(access.id.to_string())
        .bind(access.user_id.to_string())
        .bind(access.resource_id.to_string())
        .bind(access.permission_id.to_string())
        .bind(fmt_datetime(access.granted_at))
        .bind(granted_by.map(|id| id.to_string()))
        .bind(access.conditions.to_json().to_string())
        .bind(fmt_datetime(access.expires_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict("access already granted"));
        }
        Ok(access)
    }

    pub async fn list_access(&self, query: &ResourceAccessQuery) -> AppResult<Vec<ResourceAccess>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCESS_COLUMNS} FROM resource_access \
             WHERE (?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR resource_id = ?2) ORDER BY granted_at"
        ))
        .bind(query.user_id.map(|id| id.to_string()))
        .bind(query.resource_id.map(|id| id.to_string()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(resource_access_from_row).collect()
    }

    pub async fn revoke_access(&self, id: Uuid) -> AppResult<ResourceAccess> {
        let row = sqlx::query(&format!("SELECT {ACCESS_COLUMNS} FROM resource_access WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("access grant not found"))?;
        let access = resource_access_from_row(&row)?;

        sqlx::query("DELETE FROM resource_access WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(access)
    }

    // ---------------------------------------------------------------------
    // revoked tokens
    // ---------------------------------------------------------------------

    /// Records a revoked token and drops revocations whose token has expired anyway.
    pub async fn revoke_token(&self, fingerprint: &str, user_id: Uuid, expires_at: DateTime<Utc>) -> AppResult<()> {
        self.prune_revoked_tokens(utc_now()).await?;
        sqlx::query(
            "INSERT INTO revoked_tokens (fingerprint, user_id, expires_at, revoked_at) VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(fingerprint)
        .bind(user_id.to_string())
        .bind(fmt_datetime(expires_at))
        .bind(fmt_datetime(utc_now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Expired tokens fail signature validation before the revocation lookup,
    /// so their rows are no longer needed.
    pub async fn prune_revoked_tokens(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < ?")
            .bind(fmt_datetime(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn is_token_revoked(&self, fingerprint: &str) -> AppResult<bool> {
        let found: Option<String> = sqlx::query_scalar("SELECT fingerprint FROM revoked_tokens WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn roles_of(&self, user_id: Uuid) -> AppResult<Vec<RoleAssignment>> {
        let rows = sqlx::query(
            "SELECT ur.id, ur.user_id, ur.role_id, ur.assigned_at, ur.assigned_by, ur.resource_scope, \
             r.id AS r_id, r.name AS r_name, r.code AS r_code, r.description AS r_description, r.is_admin AS r_is_admin \
             FROM user_roles ur JOIN roles r ON r.id = ur.role_id \
             WHERE ur.user_id = ? ORDER BY ur.assigned_at",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok::<_, AppError>(RoleAssignment {
                    assignment: user_role_from_row(row)?,
                    role: role_from_row_prefixed(row, "r_")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl PermissionCatalog for SqliteStore {
    async fn grants_of(&self, role_id: Uuid) -> AppResult<Vec<RoleGrant>> {
        let rows = sqlx::query(&format!(
            "SELECT rp.id, rp.role_id, rp.permission_id, rp.conditions, {PERMISSION_ALIASED} \
             FROM role_permissions rp JOIN permissions p ON p.id = rp.permission_id \
             WHERE rp.role_id = ? ORDER BY p.codename"
        ))
        .bind(role_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok::<_, AppError>(RoleGrant {
                    grant: role_permission_from_row(row)?,
                    permission: permission_from_row_prefixed(row, "p_")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl DirectGrantStore for SqliteStore {
    async fn active_grants_of(
        &self,
        user_id: Uuid,
        resource_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<DirectGrant>> {
        // stored timestamps carry microseconds
        let now = now.trunc_subsecs(6);
        let rows = sqlx::query(&format!(
            "SELECT ra.id, ra.user_id, ra.resource_id, ra.permission_id, ra.granted_at, ra.granted_by, ra.conditions, ra.expires_at, \
             {PERMISSION_ALIASED} \
             FROM resource_access ra JOIN permissions p ON p.id = ra.permission_id \
             WHERE ra.user_id = ?1 AND ra.expires_at >= ?2 AND (?3 IS NULL OR ra.resource_id = ?3) \
             ORDER BY ra.granted_at"
        ))
        .bind(user_id.to_string())
        .bind(fmt_datetime(now))
        .bind(resource_id.map(|id| id.to_string()))
        .fetch_all(&self.pool)
        .await?;

        let mut grants = Vec::with_capacity(rows.len());
        for row in &rows {
            let access = resource_access_from_row(row)?;
            if access.is_expired(now) {
                continue;
            }
            grants.push(DirectGrant {
                access,
                permission: permission_from_row_prefixed(row, "p_")?,
            });
        }
        Ok(grants)
    }
}
