use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{authz, models, routes, store};

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::register,
		routes::auth::login,
		routes::auth::logout,
		routes::auth::refresh,
		routes::auth::profile,
		routes::auth::update_profile,
		routes::auth::delete_profile,
		routes::rbac::list_roles,
		routes::rbac::create_role,
		routes::rbac::get_role,
		routes::rbac::delete_role,
		routes::rbac::list_role_permissions,
		routes::rbac::assign_permission_to_role,
		routes::rbac::revoke_permission_from_role,
		routes::rbac::list_permissions,
		routes::rbac::create_permission,
		routes::rbac::list_resource_types,
		routes::rbac::create_resource_type,
		routes::rbac::list_user_roles,
		routes::rbac::assign_role,
		routes::rbac::revoke_user_role,
		routes::rbac::list_resource_access,
		routes::rbac::grant_resource_access,
		routes::rbac::revoke_resource_access,
		routes::rbac::delete_user,
		routes::rbac::effective_permissions,
		routes::resources::list_resources,
		routes::resources::get_resource,
		routes::resources::create_resource,
		routes::resources::update_resource,
		routes::resources::delete_resource,
		routes::access::check_access,
		routes::audit::list_audit_events,
		routes::system::initialize
	),
	components(
		schemas(
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::RefreshRequest,
			models::user::RefreshResponse,
			models::user::LogoutRequest,
			models::user::RegisterRequest,
			models::user::ProfileUpdateRequest,
			models::user::Profile,
			models::rbac::Action,
			models::rbac::ResourceType,
			models::rbac::ResourceTypeCreateRequest,
			models::rbac::Permission,
			models::rbac::PermissionCreateRequest,
			models::rbac::Role,
			models::rbac::RoleCreateRequest,
			models::rbac::RolePermission,
			models::rbac::RoleGrant,
			models::rbac::AssignPermissionToRoleRequest,
			models::rbac::UserRole,
			models::rbac::AssignRoleRequest,
			models::rbac::EffectivePermissions,
			models::rbac::EffectivePermission,
			models::resource::Resource,
			models::resource::ResourceCreateRequest,
			models::resource::ResourceUpdateRequest,
			models::resource::ResourceAccess,
			models::resource::GrantAccessRequest,
			models::resource::AccessCheckRequest,
			models::resource::AccessCheckResponse,
			models::audit::AuditAction,
			models::audit::AuditEvent,
			authz::AllowReason,
			authz::DenyReason,
			routes::MessageResponse,
			routes::health::HealthResponse,
			store::seed::InitializeSummary
		)
	),
	tags(
		(name = "Auth", description = "Registration, login and profile"),
		(name = "RBAC", description = "Roles, permissions, assignments and direct grants"),
		(name = "Resources", description = "Permission-checked resources"),
		(name = "Access", description = "Permission checks"),
		(name = "Audit", description = "Audit trail"),
		(name = "System", description = "System bootstrap"),
		(name = "Health", description = "Liveness")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.persist_authorization(true);

	let doc = Arc::new(doc);
	let json_route = get(move || {
		let doc = Arc::clone(&doc);
		async move { Json((*doc).clone()) }
	});

	Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config))
}

fn ensure_security_components(doc: &mut Value) {
	let Some(root) = doc.as_object_mut() else {
		return;
	};
	let components = root.entry("components").or_insert_with(|| json!({}));
	let Some(components) = components.as_object_mut() else {
		return;
	};
	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| json!({}));
	if let Some(schemes) = schemes.as_object_mut() {
		schemes.entry("bearerAuth").or_insert_with(|| {
			json!({
				"type": "http",
				"scheme": "bearer",
				"bearerFormat": "JWT"
			})
		});
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	if let Some(root) = doc.as_object_mut() {
		let has_servers = root
			.get("servers")
			.and_then(Value::as_array)
			.map(|servers| !servers.is_empty())
			.unwrap_or(false);
		if !has_servers {
			root.insert(
				"servers".to_string(),
				json!([{ "url": format!("http://localhost:{port}"), "description": "Local server" }]),
			);
		}
	}
}
