use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::DefaultPolicyEvaluator;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_audit_listener, AuditRecorder};
use crate::jwt::JwtConfig;
use crate::routes::{access, audit, auth, health, rbac, resources, system};
use crate::store::SqliteStore;

pub type Engine = DefaultPolicyEvaluator<SqliteStore>;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub store: SqliteStore,
    pub engine: Arc<Engine>,
    pub audit: AuditRecorder,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, audit: AuditRecorder) -> Self {
        let store = SqliteStore::new(pool.clone());
        Self {
            pool,
            jwt: Arc::new(jwt),
            engine: Arc::new(DefaultPolicyEvaluator::new(store.clone())),
            store,
            audit,
        }
    }
}

/// `APP_PORT`, default 8000.
pub fn app_port() -> Result<u16, AppError> {
    std::env::var("APP_PORT")
        .map(|val| val.parse::<u16>())
        .unwrap_or(Ok(8000))
        .map_err(|_| AppError::configuration("APP_PORT must be a valid port number"))
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let openapi = crate::docs::build_openapi(app_port()?)?;
    let (bus, rx) = init_event_bus();
    tokio::spawn(start_audit_listener(rx));

    let state = AppState::new(pool.clone(), jwt_config, AuditRecorder::new(pool, bus));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/refresh", post(auth::refresh))
        .route(
            "/profile",
            get(auth::profile).put(auth::update_profile).delete(auth::delete_profile),
        );

    let resource_routes = Router::new()
        .route("/", get(resources::list_resources).post(resources::create_resource))
        .route(
            "/:id",
            get(resources::get_resource)
                .put(resources::update_resource)
                .delete(resources::delete_resource),
        );

    let api = Router::new()
        .nest("/auth", auth_routes)
        .nest("/rbac", rbac::routes())
        .nest("/resources", resource_routes)
        .route("/access/check", post(access::check_access))
        .route("/audit", get(audit::list_audit_events))
        .route("/system/initialize", post(system::initialize))
        .route("/health", get(health::health));

    let router = Router::new()
        .nest("/api", api)
        .with_state(state)
        .merge(crate::docs::swagger_routes(openapi))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
