use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};
use crate::models::rbac::{EffectivePermission, EffectivePermissions};
use crate::models::resource::Resource;
use crate::models::user::User;
use crate::store::AccessStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    Superuser,
    Staff,
    Owner,
    AdminRole,
    RoleGrant,
    DirectGrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Inactive,
    NoMatch,
}

/// Outcome of a permission check together with the rule that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow(AllowReason),
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Decision::Allow(AllowReason::Superuser) => "superuser",
            Decision::Allow(AllowReason::Staff) => "staff",
            Decision::Allow(AllowReason::Owner) => "owner",
            Decision::Allow(AllowReason::AdminRole) => "admin_role",
            Decision::Allow(AllowReason::RoleGrant) => "role_grant",
            Decision::Allow(AllowReason::DirectGrant) => "direct_grant",
            Decision::Deny(DenyReason::Inactive) => "inactive",
            Decision::Deny(DenyReason::NoMatch) => "no_match",
        }
    }
}

/// Permission resolution over users, roles, grants and resources.
///
/// A deny is an ordinary `Ok` value. Only store failures are errors.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Decides with an explicit clock for direct-grant expiry.
    async fn decide_at(
        &self,
        user: &User,
        codename: &str,
        resource: Option<&Resource>,
        now: DateTime<Utc>,
    ) -> AppResult<Decision>;

    /// Active and either superuser or holder of an admin role.
    async fn is_admin(&self, user: &User) -> AppResult<bool>;

    async fn decide(&self, user: &User, codename: &str, resource: Option<&Resource>) -> AppResult<Decision> {
        self.decide_at(user, codename, resource, Utc::now()).await
    }

    async fn resolve_at(
        &self,
        user: &User,
        codename: &str,
        resource: Option<&Resource>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(self.decide_at(user, codename, resource, now).await?.is_allowed())
    }

    async fn resolve(&self, user: &User, codename: &str, resource: Option<&Resource>) -> AppResult<bool> {
        self.resolve_at(user, codename, resource, Utc::now()).await
    }

    /// Turns a deny into `PermissionDenied`.
    async fn require(&self, user: &User, codename: &str, resource: Option<&Resource>) -> AppResult<()> {
        if self.resolve(user, codename, resource).await? {
            Ok(())
        } else {
            tracing::warn!(
                user_id = %user.id,
                permission = %codename,
                resource_id = ?resource.map(|r| r.id),
                "permission denied"
            );
            Err(AppError::permission_denied(format!("missing permission {codename}")))
        }
    }
}

/// Default evaluator. First matching rule wins:
///
/// 1. inactive user -> deny
/// 2. superuser or staff -> allow
/// 3. owner of the target resource -> allow
/// 4. per role assignment: admin role -> allow; with a resource, scope accepts
///    it and the role grants the codename for the resource's type -> allow;
///    without a resource, a role grant for the codename whose conditions hold -> allow
/// 5. with a resource, an unexpired direct grant on it with holding conditions -> allow
/// 6. without a resource, any unexpired direct grant for the codename with holding conditions -> allow
/// 7. deny
#[derive(Debug, Clone)]
pub struct DefaultPolicyEvaluator<S> {
    store: S,
}

impl<S: AccessStore> DefaultPolicyEvaluator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn role_decision(&self, user: &User, codename: &str, resource: Option<&Resource>) -> AppResult<Option<AllowReason>> {
        for assignment in self.store.roles_of(user.id).await? {
            if assignment.role.is_admin {
                return Ok(Some(AllowReason::AdminRole));
            }

            match resource {
                Some(resource) => {
                    if !assignment.assignment.resource_scope.accepts(resource) {
                        tracing::trace!(
                            user_id = %user.id,
                            role = %assignment.role.code,
                            resource_id = %resource.id,
                            "resource outside role scope"
                        );
                        continue;
                    }
                    let grants = self.store.grants_of(assignment.role.id).await?;
                    if grants.iter().any(|g| {
                        g.permission.codename == codename
                            && g.permission.resource_type_id == resource.resource_type_id
                    }) {
                        return Ok(Some(AllowReason::RoleGrant));
                    }
                }
                None => {
                    let grants = self.store.grants_of(assignment.role.id).await?;
                    if grants
                        .iter()
                        .any(|g| g.permission.codename == codename && g.grant.conditions.evaluate(user))
                    {
                        return Ok(Some(AllowReason::RoleGrant));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Role grants and unexpired direct grants of `user`, labelled with where they come from.
    pub async fn effective_permissions(&self, user: &User, now: DateTime<Utc>) -> AppResult<EffectivePermissions> {
        let mut roles = Vec::new();
        let mut permissions = Vec::new();

        for assignment in self.store.roles_of(user.id).await? {
            for grant in self.store.grants_of(assignment.role.id).await? {
                permissions.push(EffectivePermission {
                    codename: grant.permission.codename,
                    source: "role".to_string(),
                    role_name: Some(assignment.role.name.clone()),
                    resource_id: None,
                    expires_at: None,
                });
            }
            roles.push(assignment.role.name);
        }

        for direct in self.store.active_grants_of(user.id, None, now).await? {
            permissions.push(EffectivePermission {
                codename: direct.permission.codename,
                source: "direct".to_string(),
                role_name: None,
                resource_id: Some(direct.access.resource_id),
                expires_at: Some(direct.access.expires_at),
            });
        }

        Ok(EffectivePermissions {
            user_id: user.id,
            elevated: user.is_elevated(),
            roles,
            permissions,
        })
    }
}

#[async_trait]
impl<S: AccessStore> PolicyEvaluator for DefaultPolicyEvaluator<S> {
    async fn decide_at(
        &self,
        user: &User,
        codename: &str,
        resource: Option<&Resource>,
        now: DateTime<Utc>,
    ) -> AppResult<Decision> {
        let decision = if !user.is_active {
            Decision::Deny(DenyReason::Inactive)
        } else if user.is_superuser {
            Decision::Allow(AllowReason::Superuser)
        } else if user.is_staff {
            Decision::Allow(AllowReason::Staff)
        } else if resource.is_some_and(|r| r.is_owned_by(user.id)) {
            Decision::Allow(AllowReason::Owner)
        } else if let Some(reason) = self.role_decision(user, codename, resource).await? {
            Decision::Allow(reason)
        } else {
            let direct = self
                .store
                .active_grants_of(user.id, resource.map(|r| r.id), now)
                .await?;
            if direct
                .iter()
                .any(|g| g.permission.codename == codename && g.access.conditions.evaluate(user))
            {
                Decision::Allow(AllowReason::DirectGrant)
            } else {
                Decision::Deny(DenyReason::NoMatch)
            }
        };

        tracing::debug!(
            user_id = %user.id,
            permission = %codename,
            resource_id = ?resource.map(|r| r.id),
            decision = decision.reason(),
            allowed = decision.is_allowed(),
            "permission resolved"
        );
        Ok(decision)
    }

    async fn is_admin(&self, user: &User) -> AppResult<bool> {
        if !user.is_active {
            return Ok(false);
        }
        if user.is_superuser {
            return Ok(true);
        }
        Ok(self
            .store
            .roles_of(user.id)
            .await?
            .iter()
            .any(|a| a.role.is_admin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::Duration;
    use serde_json::json;
    use uuid::Uuid;

    use crate::authz::{Condition, ConditionSet, ResourceScope};
    use crate::models::rbac::{codename, Action, Permission, Role};
    use crate::store::MemoryStore;

    struct Fixture {
        engine: DefaultPolicyEvaluator<MemoryStore>,
        permissions: HashMap<String, Permission>,
        project_type: Uuid,
        document_type: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            let store = MemoryStore::new();
            let project_type = Uuid::new_v4();
            let document_type = Uuid::new_v4();
            let mut permissions = HashMap::new();
            for (type_id, code) in [(project_type, "project"), (document_type, "document")] {
                for action in Action::ALL {
                    let permission = store
                        .insert_permission(Permission {
                            id: Uuid::new_v4(),
                            codename: codename(action, code),
                            name: format!("{action} {code}"),
                            resource_type_id: type_id,
                            action,
                            description: String::new(),
                        })
                        .unwrap();
                    permissions.insert(permission.codename.clone(), permission);
                }
            }
            Self {
                engine: DefaultPolicyEvaluator::new(store),
                permissions,
                project_type,
                document_type,
            }
        }

        fn store(&self) -> &MemoryStore {
            self.engine.store()
        }

        fn permission(&self, code: &str) -> Permission {
            self.permissions[code].clone()
        }

        fn role(&self, code: &str, is_admin: bool) -> Role {
            self.store()
                .insert_role(Role {
                    id: Uuid::new_v4(),
                    name: code.to_string(),
                    code: code.to_string(),
                    description: String::new(),
                    is_admin,
                })
                .unwrap()
        }

        fn resource(&self, type_id: Uuid, owner_id: Uuid) -> Resource {
            let now = Utc::now();
            Resource {
                id: Uuid::new_v4(),
                resource_type_id: type_id,
                name: "Alpha".to_string(),
                description: String::new(),
                owner_id,
                metadata: json!({}),
                created_at: now,
                updated_at: now,
                is_active: true,
            }
        }
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", Uuid::new_v4()),
            first_name: "Ivan".to_string(),
            last_name: "Petrov".to_string(),
            patronymic: String::new(),
            is_active: true,
            is_staff: false,
            is_superuser: false,
            date_joined: Utc::now(),
            last_login: None,
        }
    }

    #[tokio::test]
    async fn inactive_users_are_denied_even_when_elevated() {
        let fx = Fixture::new();
        let admin_role = fx.role("admin", true);
        let mut u = user();
        u.is_superuser = true;
        u.is_active = false;
        fx.store().assign_role(u.id, admin_role.id, ResourceScope::unrestricted(), None).unwrap();
        let own = fx.resource(fx.project_type, u.id);

        let decision = fx.engine.decide(&u, "view_project", Some(&own)).await.unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::Inactive));
        assert!(!fx.engine.is_admin(&u).await.unwrap());
    }

    #[tokio::test]
    async fn elevated_users_pass_every_codename() {
        let fx = Fixture::new();
        let mut staff = user();
        staff.is_staff = true;
        let mut root = user();
        root.is_superuser = true;
        let foreign = fx.resource(fx.document_type, Uuid::new_v4());

        for code in ["view_project", "manage_document", "anything_at_all"] {
            assert_eq!(
                fx.engine.decide(&staff, code, Some(&foreign)).await.unwrap(),
                Decision::Allow(AllowReason::Staff)
            );
            assert_eq!(
                fx.engine.decide(&root, code, None).await.unwrap(),
                Decision::Allow(AllowReason::Superuser)
            );
        }
        assert!(fx.engine.is_admin(&root).await.unwrap());
        assert!(!fx.engine.is_admin(&staff).await.unwrap());
    }

    #[tokio::test]
    async fn owners_get_full_access_without_grants() {
        let fx = Fixture::new();
        let u = user();
        let own = fx.resource(fx.project_type, u.id);

        for action in Action::ALL {
            let code = codename(action, "project");
            assert_eq!(
                fx.engine.decide(&u, &code, Some(&own)).await.unwrap(),
                Decision::Allow(AllowReason::Owner)
            );
        }
        assert!(!fx.engine.resolve(&u, "view_project", None).await.unwrap());
    }

    #[tokio::test]
    async fn admin_role_allows_everything() {
        let fx = Fixture::new();
        let admin = fx.role("admin", true);
        let u = user();
        fx.store().assign_role(u.id, admin.id, ResourceScope::resource_types(["nothing"]), None).unwrap();
        let foreign = fx.resource(fx.document_type, Uuid::new_v4());

        assert_eq!(
            fx.engine.decide(&u, "delete_document", Some(&foreign)).await.unwrap(),
            Decision::Allow(AllowReason::AdminRole)
        );
        assert!(fx.engine.resolve(&u, "made_up_codename", None).await.unwrap());
        assert!(fx.engine.is_admin(&u).await.unwrap());
    }

    #[tokio::test]
    async fn unscoped_role_grant_covers_foreign_resource() {
        let fx = Fixture::new();
        let viewer = fx.role("viewer", false);
        let view_project = fx.permission("view_project");
        fx.store().grant_permission_to_role(viewer.id, view_project.id, ConditionSet::empty()).unwrap();
        let u = user();
        fx.store().assign_role(u.id, viewer.id, ResourceScope::unrestricted(), None).unwrap();
        let project = fx.resource(fx.project_type, Uuid::new_v4());

        assert_eq!(
            fx.engine.decide(&u, "view_project", Some(&project)).await.unwrap(),
            Decision::Allow(AllowReason::RoleGrant)
        );
        assert!(!fx.engine.resolve(&u, "edit_project", Some(&project)).await.unwrap());
    }

    #[tokio::test]
    async fn role_grant_must_match_resource_type() {
        let fx = Fixture::new();
        let viewer = fx.role("viewer", false);
        let view_project = fx.permission("view_project");
        fx.store().grant_permission_to_role(viewer.id, view_project.id, ConditionSet::empty()).unwrap();
        let u = user();
        fx.store().assign_role(u.id, viewer.id, ResourceScope::unrestricted(), None).unwrap();
        let document = fx.resource(fx.document_type, Uuid::new_v4());

        assert!(!fx.engine.resolve(&u, "view_project", Some(&document)).await.unwrap());
    }

    #[tokio::test]
    async fn scope_excluding_resource_type_denies_despite_grant() {
        let fx = Fixture::new();
        let viewer = fx.role("viewer", false);
        let view_project = fx.permission("view_project");
        fx.store().grant_permission_to_role(viewer.id, view_project.id, ConditionSet::empty()).unwrap();
        let u = user();
        fx.store()
            .assign_role(u.id, viewer.id, ResourceScope::resource_types([fx.document_type.to_string()]), None)
            .unwrap();
        let project = fx.resource(fx.project_type, Uuid::new_v4());

        assert_eq!(
            fx.engine.decide(&u, "view_project", Some(&project)).await.unwrap(),
            Decision::Deny(DenyReason::NoMatch)
        );
    }

    #[tokio::test]
    async fn scope_listing_resource_type_allows() {
        let fx = Fixture::new();
        let viewer = fx.role("viewer", false);
        let view_project = fx.permission("view_project");
        fx.store().grant_permission_to_role(viewer.id, view_project.id, ConditionSet::empty()).unwrap();
        let u = user();
        fx.store()
            .assign_role(u.id, viewer.id, ResourceScope::resource_types([fx.project_type.to_string()]), None)
            .unwrap();
        let project = fx.resource(fx.project_type, Uuid::new_v4());

        assert!(fx.engine.resolve(&u, "view_project", Some(&project)).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_scope_keys_are_accepted() {
        let fx = Fixture::new();
        let viewer = fx.role("viewer", false);
        let view_project = fx.permission("view_project");
        fx.store().grant_permission_to_role(viewer.id, view_project.id, ConditionSet::empty()).unwrap();
        let u = user();
        let scope = ResourceScope::try_from(json!({"region": ["eu"]})).unwrap();
        fx.store().assign_role(u.id, viewer.id, scope, None).unwrap();
        let project = fx.resource(fx.project_type, Uuid::new_v4());

        assert!(fx.engine.resolve(&u, "view_project", Some(&project)).await.unwrap());
    }

    #[tokio::test]
    async fn resourceless_check_uses_role_grant_with_conditions() {
        let fx = Fixture::new();
        let creator = fx.role("creator", false);
        let create_project = fx.permission("create_project");
        let conditions = ConditionSet::empty()
            .with(Condition::TimeRestriction(json!({"from": "09:00", "to": "18:00"})))
            .with(Condition::Unknown { kind: "ip_range".to_string(), params: json!("10.0.0.0/8") });
        fx.store().grant_permission_to_role(creator.id, create_project.id, conditions).unwrap();
        let u = user();
        fx.store().assign_role(u.id, creator.id, ResourceScope::unrestricted(), None).unwrap();

        assert_eq!(
            fx.engine.decide(&u, "create_project", None).await.unwrap(),
            Decision::Allow(AllowReason::RoleGrant)
        );
        assert!(!fx.engine.resolve(&u, "create_document", None).await.unwrap());
    }

    #[tokio::test]
    async fn direct_grant_holds_until_expiry_instant() {
        let fx = Fixture::new();
        let u = user();
        let document = fx.resource(fx.document_type, Uuid::new_v4());
        let view_document = fx.permission("view_document");
        let today = Utc::now();
        let tomorrow = today + Duration::days(1);
        fx.store()
            .grant_access(u.id, document.id, view_document.id, tomorrow, ConditionSet::empty())
            .unwrap();

        assert_eq!(
            fx.engine.decide_at(&u, "view_document", Some(&document), today).await.unwrap(),
            Decision::Allow(AllowReason::DirectGrant)
        );
        assert!(fx.engine.resolve_at(&u, "view_document", Some(&document), tomorrow).await.unwrap());

        let after = tomorrow + Duration::microseconds(1);
        for _ in 0..3 {
            assert!(!fx.engine.resolve_at(&u, "view_document", Some(&document), after).await.unwrap());
        }
    }

    #[tokio::test]
    async fn direct_grant_is_bound_to_its_resource() {
        let fx = Fixture::new();
        let u = user();
        let granted = fx.resource(fx.document_type, Uuid::new_v4());
        let other = fx.resource(fx.document_type, Uuid::new_v4());
        let view_document = fx.permission("view_document");
        fx.store()
            .grant_access(u.id, granted.id, view_document.id, Utc::now() + Duration::hours(1), ConditionSet::empty())
            .unwrap();

        assert!(!fx.engine.resolve(&u, "view_document", Some(&other)).await.unwrap());
        // without a resource any live direct grant with the codename counts
        assert_eq!(
            fx.engine.decide(&u, "view_document", None).await.unwrap(),
            Decision::Allow(AllowReason::DirectGrant)
        );
        assert!(!fx.engine.resolve(&u, "edit_document", None).await.unwrap());
    }

    #[tokio::test]
    async fn require_maps_deny_to_permission_denied() {
        let fx = Fixture::new();
        let u = user();
        let err = fx.engine.require(&u, "view_project", None).await.unwrap_err();
        assert_eq!(err.code(), "permission_denied");

        let own = fx.resource(fx.project_type, u.id);
        fx.engine.require(&u, "delete_project", Some(&own)).await.unwrap();
    }

    #[tokio::test]
    async fn effective_permissions_list_sources() {
        let fx = Fixture::new();
        let viewer = fx.role("viewer", false);
        let view_project = fx.permission("view_project");
        let view_document = fx.permission("view_document");
        fx.store().grant_permission_to_role(viewer.id, view_project.id, ConditionSet::empty()).unwrap();
        let u = user();
        fx.store().assign_role(u.id, viewer.id, ResourceScope::unrestricted(), None).unwrap();
        let doc = fx.resource(fx.document_type, Uuid::new_v4());
        let now = Utc::now();
        fx.store()
            .grant_access(u.id, doc.id, view_document.id, now + Duration::days(2), ConditionSet::empty())
            .unwrap();

        let effective = fx.engine.effective_permissions(&u, now).await.unwrap();
        assert_eq!(effective.roles, vec!["viewer".to_string()]);
        assert!(!effective.elevated);
        assert_eq!(effective.permissions.len(), 2);
        assert!(effective
            .permissions
            .iter()
            .any(|p| p.codename == "view_project" && p.source == "role"));
        assert!(effective
            .permissions
            .iter()
            .any(|p| p.codename == "view_document" && p.source == "direct" && p.resource_id == Some(doc.id)));
    }
}
