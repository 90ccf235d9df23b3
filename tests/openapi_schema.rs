use anyhow::Result;
use axum::http::StatusCode;
use serde_json::Value;

mod common;

#[test]
fn openapi_describes_decisions_and_grants() -> Result<()> {
    // Build the OpenAPI document the same way the server does
    let doc = gatekeeper::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let schemas = v
        .get("components")
        .and_then(|c| c.get("schemas"))
        .and_then(Value::as_object)
        .expect("components.schemas must exist");

    let access_props = schemas
        .get("ResourceAccess")
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
        .expect("ResourceAccess schema must have properties");
    for k in ["user_id", "resource_id", "permission_id", "expires_at", "conditions"] {
        assert!(access_props.contains_key(k), "OpenAPI ResourceAccess schema missing '{}'", k);
    }

    for name in ["AccessCheckResponse", "AuditEvent", "UserRole", "InitializeSummary"] {
        assert!(schemas.contains_key(name), "missing schema {name}");
    }

    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let t = common::setup().await?;

    let (status, body) = t.send("GET", "/api-docs/openapi.json", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"].get("/api/system/initialize").is_some());
    assert!(body["paths"].get("/api/auth/refresh").is_some());

    Ok(())
}
