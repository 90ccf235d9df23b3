use anyhow::{Context, Result};
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

mod common;
use common::{id_of, TestApp};

fn find_by<'a>(list: &'a Value, key: &str, value: &str) -> Result<&'a Value> {
    list.as_array()
        .context("expected a JSON array")?
        .iter()
        .find(|item| item[key] == value)
        .with_context(|| format!("no item with {key} = {value}"))
}

async fn initialized(t: &TestApp, token: &str) -> Result<()> {
    let (status, body) = t.send("POST", "/api/system/initialize", Some(token), None).await?;
    assert_eq!(status, StatusCode::OK, "initialize failed: {}", body);
    Ok(())
}

#[tokio::test]
async fn admin_routes_reject_plain_users() -> Result<()> {
    let t = common::setup().await?;
    let (token, _) = t.register("plain@example.com").await?;

    for (method, uri) in [
        ("GET", "/api/rbac/roles"),
        ("GET", "/api/rbac/permissions"),
        ("GET", "/api/rbac/user-roles"),
        ("GET", "/api/audit"),
        ("POST", "/api/system/initialize"),
    ] {
        let (status, body) = t.send(method, uri, Some(&token), None).await?;
        assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
        assert_eq!(body["error"], "permission_denied", "{method} {uri}");
    }

    let (status, _) = t
        .send(
            "POST",
            "/api/rbac/roles",
            Some(&token),
            Some(json!({ "name": "Sneaky", "code": "sneaky", "is_admin": true })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(t.store.role_by_code("sneaky").await?.is_none());

    Ok(())
}

#[tokio::test]
async fn initialize_is_idempotent() -> Result<()> {
    let t = common::setup().await?;
    let (token, _) = t.superuser("root@example.com").await?;

    for _ in 0..2 {
        let (status, body) = t.send("POST", "/api/system/initialize", Some(&token), None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resource_types"], 5);
        assert_eq!(body["permissions"], 25);
        assert_eq!(body["created_roles"], json!(["Administrator", "Manager", "User"]));
    }

    let permissions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permissions").fetch_one(&t.pool).await?;
    let roles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles").fetch_one(&t.pool).await?;
    let manager_grants: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM role_permissions rp JOIN roles r ON r.id = rp.role_id WHERE r.code = 'manager'",
    )
    .fetch_one(&t.pool)
    .await?;
    assert_eq!(permissions, 25);
    assert_eq!(roles, 3);
    assert_eq!(manager_grants, 8);

    Ok(())
}

#[tokio::test]
async fn each_admin_change_writes_one_audit_row() -> Result<()> {
    let t = common::setup().await?;
    let (token, _) = t.superuser("root@example.com").await?;
    let (_, user_id) = t.register("member@example.com").await?;

    let before = t.audit_count().await?;
    let (status, role) = t
        .send(
            "POST",
            "/api/rbac/roles",
            Some(&token),
            Some(json!({ "name": "Reviewer", "code": "reviewer" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(t.audit_count().await?, before + 1);

    let (status, resource_type) = t
        .send(
            "POST",
            "/api/rbac/resource-types",
            Some(&token),
            Some(json!({ "name": "Report", "code": "report" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(t.audit_count().await?, before + 2);

    let (status, permission) = t
        .send(
            "POST",
            "/api/rbac/permissions",
            Some(&token),
            Some(json!({ "resource_type_id": resource_type["id"], "action": "view", "name": "View reports" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{}", permission);
    assert_eq!(permission["codename"], "view_report");
    assert_eq!(t.audit_count().await?, before + 3);

    let role_id = id_of(&role)?;
    let (status, _) = t
        .send(
            "POST",
            &format!("/api/rbac/roles/{role_id}/permissions"),
            Some(&token),
            Some(json!({ "permission_id": permission["id"] })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(t.audit_count().await?, before + 4);

    let (status, assignment) = t
        .send(
            "POST",
            "/api/rbac/user-roles",
            Some(&token),
            Some(json!({ "user_id": user_id, "role_id": role_id })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(t.audit_count().await?, before + 5);

    // duplicates are rejected and leave no trace
    let (status, body) = t
        .send(
            "POST",
            "/api/rbac/user-roles",
            Some(&token),
            Some(json!({ "user_id": user_id, "role_id": role_id })),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
    assert_eq!(t.audit_count().await?, before + 5);

    let (status, effective) = t
        .send("GET", &format!("/api/rbac/users/{user_id}/effective-permissions"), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(effective["roles"], json!(["Reviewer"]));
    assert_eq!(effective["permissions"][0]["codename"], "view_report");
    assert_eq!(effective["permissions"][0]["source"], "role");

    let (status, _) = t
        .send("DELETE", &format!("/api/rbac/user-roles/{}", id_of(&assignment)?), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(t.audit_count().await?, before + 6);

    let (status, events) = t
        .send("GET", "/api/audit?action=access_granted", Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let events = events.as_array().context("audit list")?;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e["action"] == "access_granted"));

    Ok(())
}

#[tokio::test]
async fn roles_and_direct_grants_gate_resources() -> Result<()> {
    let t = common::setup().await?;
    let (admin, _) = t.superuser("root@example.com").await?;
    initialized(&t, &admin).await?;

    let (_, types) = t.send("GET", "/api/rbac/resource-types", Some(&admin), None).await?;
    let project_type = find_by(&types, "code", "project")?["id"].clone();
    let (_, roles) = t.send("GET", "/api/rbac/roles", Some(&admin), None).await?;
    let manager = find_by(&roles, "code", "manager")?["id"].clone();
    let (_, permissions) = t.send("GET", "/api/rbac/permissions", Some(&admin), None).await?;
    let view_project = find_by(&permissions, "codename", "view_project")?["id"].clone();

    let (alice, alice_id) = t.register("alice@example.com").await?;
    let (bob, bob_id) = t.register("bob@example.com").await?;

    let new_project = json!({ "resource_type_id": project_type, "name": "Apollo" });
    let (status, body) = t.send("POST", "/api/resources", Some(&alice), Some(new_project.clone())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");

    let (status, _) = t
        .send(
            "POST",
            "/api/rbac/user-roles",
            Some(&admin),
            Some(json!({ "user_id": alice_id, "role_id": manager })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, project) = t.send("POST", "/api/resources", Some(&alice), Some(new_project)).await?;
    assert_eq!(status, StatusCode::CREATED, "{}", project);
    let project_id = id_of(&project)?;
    assert_eq!(project["owner_id"], alice_id.to_string());

    let resource_uri = format!("/api/resources/{project_id}");
    let (status, _) = t.send("GET", &resource_uri, Some(&bob), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let check = json!({ "codename": "view_project", "resource_id": project_id });
    let (status, decision) = t.send("POST", "/api/access/check", Some(&bob), Some(check.clone())).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision, json!({ "allowed": false, "reason": "no_match" }));

    let (_, listed) = t.send("GET", "/api/resources", Some(&bob), None).await?;
    assert_eq!(listed, json!([]));

    let (status, grant) = t
        .send(
            "POST",
            "/api/rbac/resource-access",
            Some(&admin),
            Some(json!({
                "user_id": bob_id,
                "resource_id": project_id,
                "permission_id": view_project,
                "expires_at": Utc::now() + Duration::days(1),
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{}", grant);

    let (status, body) = t.send("GET", &resource_uri, Some(&bob), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Apollo");
    let (_, decision) = t.send("POST", "/api/access/check", Some(&bob), Some(check.clone())).await?;
    assert_eq!(decision, json!({ "allowed": true, "reason": "direct_grant" }));
    let (_, listed) = t.send("GET", "/api/resources", Some(&bob), None).await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    // viewing is not editing
    let (status, _) = t
        .send("PUT", &resource_uri, Some(&bob), Some(json!({ "name": "Hijacked" })))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t
        .send("DELETE", &format!("/api/rbac/resource-access/{}", id_of(&grant)?), Some(&admin), None)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = t.send("GET", &resource_uri, Some(&bob), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // the owner keeps full control
    let (status, body) = t
        .send("PUT", &resource_uri, Some(&alice), Some(json!({ "description": "moon" })))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "moon");
    let (_, decision) = t.send("POST", "/api/access/check", Some(&alice), Some(check)).await?;
    assert_eq!(decision["reason"], "owner");

    let (status, _) = t.send("DELETE", &resource_uri, Some(&alice), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = t.send("GET", &resource_uri, Some(&alice), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn unknown_resource_is_not_found() -> Result<()> {
    let t = common::setup().await?;
    let (token, _) = t.register("lost@example.com").await?;

    let (status, _) = t
        .send("GET", &format!("/api/resources/{}", Uuid::new_v4()), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn permission_codename_is_always_derived() -> Result<()> {
    let t = common::setup().await?;
    let (token, _) = t.superuser("root@example.com").await?;

    let (status, resource_type) = t
        .send(
            "POST",
            "/api/rbac/resource-types",
            Some(&token),
            Some(json!({ "name": "Project", "code": "project" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, permission) = t
        .send(
            "POST",
            "/api/rbac/permissions",
            Some(&token),
            Some(json!({
                "resource_type_id": resource_type["id"],
                "action": "view",
                "name": "View projects",
                "codename": "delete_document"
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{}", permission);
    assert_eq!(permission["codename"], "view_project");

    let stored: Vec<String> = sqlx::query_scalar("SELECT codename FROM permissions")
        .fetch_all(&t.pool)
        .await?;
    assert_eq!(stored, vec!["view_project"]);

    // the (type, action) slot is taken whatever codename is sent
    let (status, _) = t
        .send(
            "POST",
            "/api/rbac/permissions",
            Some(&token),
            Some(json!({
                "resource_type_id": resource_type["id"],
                "action": "view",
                "name": "View projects again",
                "codename": "view_project_2"
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // seeding on top of it reuses the existing row
    let (status, body) = t.send("POST", "/api/system/initialize", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["permissions"], 25);

    Ok(())
}

#[tokio::test]
async fn admins_can_permanently_delete_users() -> Result<()> {
    let t = common::setup().await?;
    let (admin, root) = t.superuser("root@example.com").await?;
    initialized(&t, &admin).await?;
    let (member_token, member_id) = t.register("doomed@example.com").await?;

    let role = t.store.role_by_code("user").await?.context("seeded user role")?;
    let (status, _) = t
        .send(
            "POST",
            "/api/rbac/user-roles",
            Some(&admin),
            Some(json!({ "user_id": member_id, "role_id": role.id })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = t
        .send("DELETE", &format!("/api/rbac/users/{}", root.id), Some(&member_token), None)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t
        .send("DELETE", &format!("/api/rbac/users/{}", root.id), Some(&admin), None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

    let (status, _) = t
        .send("DELETE", &format!("/api/rbac/users/{member_id}"), Some(&admin), None)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(t.store.user_by_id(member_id).await?.is_none());

    let assignments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_roles WHERE user_id = ?1")
        .bind(member_id.to_string())
        .fetch_one(&t.pool)
        .await?;
    assert_eq!(assignments, 0);

    // the registration event loses its user, the deletion is attributed to the admin
    let rows: Vec<(Option<String>, String)> = sqlx::query_as(
        "SELECT user_id, action FROM audit_log WHERE resource_type = 'user' AND resource_id = ?1 ORDER BY timestamp, rowid",
    )
    .bind(member_id.to_string())
    .fetch_all(&t.pool)
    .await?;
    assert_eq!(
        rows,
        vec![(None, "create".to_string()), (Some(root.id.to_string()), "delete".to_string())]
    );

    let (status, _) = t.send("GET", "/api/auth/profile", Some(&member_token), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t
        .send("DELETE", &format!("/api/rbac/users/{member_id}"), Some(&admin), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}
