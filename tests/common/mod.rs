#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use gatekeeper::create_app;
use gatekeeper::models::user::{NewUser, User};
use gatekeeper::store::SqliteStore;
use gatekeeper::utils::hash_password;

pub const PASSWORD: &str = "S3curePassw0rd";

/// A migrated database in a temp dir plus the router built on top of it.
/// Keep `_dir` alive for the duration of the test.
pub struct TestApp {
    pub _dir: TempDir,
    pub pool: SqlitePool,
    pub store: SqliteStore,
    pub app: Router,
}

pub async fn setup() -> Result<TestApp> {
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    // tests run in CI/container; ensure a JWT secret is available for signing tokens
    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok(TestApp {
        _dir: dir,
        store: SqliteStore::new(pool.clone()),
        pool,
        app,
    })
}

impl TestApp {
    /// Sends a request and returns the status with the JSON body (`Null` when empty).
    pub async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.app.clone().oneshot(req).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .with_context(|| format!("non-JSON body: {}", String::from_utf8_lossy(&bytes)))?
        };
        Ok((status, value))
    }

    /// Registers through the API and returns `(token, user_id)`.
    pub async fn register(&self, email: &str) -> Result<(String, Uuid)> {
        let (status, body) = self
            .send(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({
                    "email": email,
                    "password": PASSWORD,
                    "password2": PASSWORD,
                    "first_name": "Test",
                    "last_name": "User"
                })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        token_and_id(&body)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(StatusCode, Value)> {
        self.send(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }

    /// Inserts a superuser directly and logs in through the API.
    pub async fn superuser(&self, email: &str) -> Result<(String, User)> {
        let user = self
            .store
            .create_user(NewUser {
                email: email.to_string(),
                first_name: "Root".to_string(),
                last_name: "Admin".to_string(),
                patronymic: String::new(),
                password_hash: hash_password(PASSWORD)?,
                is_staff: false,
                is_superuser: true,
            })
            .await?;
        let (status, body) = self.login(email, PASSWORD).await?;
        assert_eq!(status, StatusCode::OK, "superuser login failed: {}", body);
        let (token, _) = token_and_id(&body)?;
        Ok((token, user))
    }

    pub async fn audit_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?)
    }
}

pub fn token_and_id(body: &Value) -> Result<(String, Uuid)> {
    let token = body["token"].as_str().context("missing token")?.to_string();
    let id = body["user"]["id"].as_str().context("missing user id")?.parse()?;
    Ok((token, id))
}

pub fn id_of(body: &Value) -> Result<Uuid> {
    Ok(body["id"].as_str().context("missing id")?.parse()?)
}
