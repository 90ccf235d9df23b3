use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{DirectGrantStore, IdentityStore, PermissionCatalog};
use crate::authz::{ConditionSet, ResourceScope};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{Permission, Role, RoleAssignment, RoleGrant, RolePermission, UserRole};
use crate::models::resource::{DirectGrant, ResourceAccess};

#[derive(Debug, Default)]
struct State {
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    role_permissions: Vec<RolePermission>,
    user_roles: Vec<UserRole>,
    resource_access: Vec<ResourceAccess>,
}

/// In-memory access store.
///
/// Enforces the same uniqueness rules as the database: one grant per
/// (role, permission), one assignment per (user, role) and one direct grant
/// per (user, resource, permission). The check and the insert happen under a
/// single write lock, so concurrent duplicates produce one row and `Conflict`
/// for the rest.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> AppResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|e| AppError::internal(format!("memory store lock poisoned: {e}")))
    }

    fn write(&self) -> AppResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|e| AppError::internal(format!("memory store lock poisoned: {e}")))
    }

    pub fn insert_role(&self, role: Role) -> AppResult<Role> {
        let mut state = self.write()?;
        if state.roles.values().any(|r| r.code == role.code || r.name == role.name) {
            return Err(AppError::conflict(format!("role '{}' already exists", role.code)));
        }
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    pub fn insert_permission(&self, permission: Permission) -> AppResult<Permission> {
        let mut state = self.write()?;
        if state.permissions.values().any(|p| p.codename == permission.codename) {
            return Err(AppError::conflict(format!(
                "permission '{}' already exists",
                permission.codename
            )));
        }
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    pub fn grant_permission_to_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        conditions: ConditionSet,
    ) -> AppResult<RolePermission> {
        let mut state = self.write()?;
        if !state.roles.contains_key(&role_id) {
            return Err(AppError::not_found("role not found"));
        }
        if !state.permissions.contains_key(&permission_id) {
            return Err(AppError::not_found("permission not found"));
        }
        if state
            .role_permissions
            .iter()
            .any(|rp| rp.role_id == role_id && rp.permission_id == permission_id)
        {
            return Err(AppError::conflict("role already holds this permission"));
        }
        let grant = RolePermission {
            id: Uuid::new_v4(),
            role_id,
            permission_id,
            conditions,
        };
        state.role_permissions.push(grant.clone());
        Ok(grant)
    }

    pub fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        resource_scope: ResourceScope,
        assigned_by: Option<Uuid>,
    ) -> AppResult<UserRole> {
        let mut state = self.write()?;
        if !state.roles.contains_key(&role_id) {
            return Err(AppError::not_found("role not found"));
        }
        if state
            .user_roles
            .iter()
            .any(|ur| ur.user_id == user_id && ur.role_id == role_id)
        {
            return Err(AppError::conflict("user already has this role"));
        }
        let assignment = UserRole {
            id: Uuid::new_v4(),
            user_id,
            role_id,
            assigned_at: Utc::now(),
            assigned_by,
            resource_scope,
        };
        state.user_roles.push(assignment.clone());
        Ok(assignment)
    }

    pub fn grant_access(
        &self,
        user_id: Uuid,
        resource_id: Uuid,
        permission_id: Uuid,
        expires_at: DateTime<Utc>,
        conditions: ConditionSet,
    ) -> AppResult<ResourceAccess> {
        let mut state = self.write()?;
        if !state.permissions.contains_key(&permission_id) {
            return Err(AppError::not_found("permission not found"));
        }
        if state.resource_access.iter().any(|ra| {
            ra.user_id == user_id && ra.resource_id == resource_id && ra.permission_id == permission_id
        }) {
            return Err(AppError::conflict("access already granted"));
        }
        let access = ResourceAccess {
            id: Uuid::new_v4(),
            user_id,
            resource_id,
            permission_id,
            granted_at: Utc::now(),
            granted_by: None,
            conditions,
            expires_at,
        };
        state.resource_access.push(access.clone());
        Ok(access)
    }

    pub fn assignment_count(&self, user_id: Uuid) -> AppResult<usize> {
        Ok(self.read()?.user_roles.iter().filter(|ur| ur.user_id == user_id).count())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn roles_of(&self, user_id: Uuid) -> AppResult<Vec<RoleAssignment>> {
        let state = self.read()?;
        Ok(state
            .user_roles
            .iter()
            .filter(|ur| ur.user_id == user_id)
            .filter_map(|ur| {
                state.roles.get(&ur.role_id).map(|role| RoleAssignment {
                    assignment: ur.clone(),
                    role: role.clone(),
                })
            })
            .collect())
    }
}

#[async_trait]
impl PermissionCatalog for MemoryStore {
    async fn grants_of(&self, role_id: Uuid) -> AppResult<Vec<RoleGrant>> {
        let state = self.read()?;
        Ok(state
            .role_permissions
            .iter()
            .filter(|rp| rp.role_id == role_id)
            .filter_map(|rp| {
                state.permissions.get(&rp.permission_id).map(|permission| RoleGrant {
                    grant: rp.clone(),
                    permission: permission.clone(),
                })
            })
            .collect())
    }
}

#[async_trait]
impl DirectGrantStore for MemoryStore {
    async fn active_grants_of(
        &self,
        user_id: Uuid,
        resource_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<DirectGrant>> {
        let state = self.read()?;
        Ok(state
            .resource_access
            .iter()
            .filter(|ra| ra.user_id == user_id)
            .filter(|ra| resource_id.map_or(true, |id| ra.resource_id == id))
            .filter(|ra| !ra.is_expired(now))
            .filter_map(|ra| {
                state.permissions.get(&ra.permission_id).map(|permission| DirectGrant {
                    access: ra.clone(),
                    permission: permission.clone(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn role(code: &str) -> Role {
        Role {
            id: Uuid::new_v4(),
            name: code.to_uppercase(),
            code: code.to_string(),
            description: String::new(),
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn concurrent_duplicate_assignments_store_one_row() {
        let store = Arc::new(MemoryStore::new());
        let role = store.insert_role(role("editor")).unwrap();
        let user_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.assign_role(user_id, role.id, ResourceScope::unrestricted(), None)
            }));
        }

        let mut created = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(AppError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(store.assignment_count(user_id).unwrap(), 1);
        assert_eq!(store.roles_of(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_role_codes_are_rejected() {
        let store = MemoryStore::new();
        store.insert_role(role("viewer")).unwrap();
        assert!(matches!(
            store.insert_role(role("viewer")),
            Err(AppError::Conflict(_))
        ));
    }
}
