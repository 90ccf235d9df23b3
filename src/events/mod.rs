use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::row_parsers::{audit_event_from_row, fmt_datetime};
use crate::errors::{AppError, AppResult};
use crate::models::audit::{AuditAction, AuditEvent, AuditQuery};
use crate::utils::utc_now;

pub mod loggable;
pub use loggable::Loggable;

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1000;

pub type EventBus = broadcast::Sender<AuditEvent>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<AuditEvent>) {
    broadcast::channel(1024)
}

/// Request context for audit events (IP, User-Agent)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Extract context from Axum request headers
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.trim().to_string())
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }
}

/// Appends audit events and fans them out to live subscribers.
///
/// Persistence is awaited and its failure is returned as
/// [`AppError::AuditWrite`]. Broadcasting happens after the row is stored and
/// never fails the call.
#[derive(Clone)]
pub struct AuditRecorder {
    pool: SqlitePool,
    bus: EventBus,
}

impl AuditRecorder {
    pub fn new(pool: SqlitePool, bus: EventBus) -> Self {
        Self { pool, bus }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.bus.subscribe()
    }

    pub async fn record(
        &self,
        user_id: Option<Uuid>,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        details: Value,
        origin: Option<&RequestContext>,
    ) -> AppResult<AuditEvent> {
        let details = match details {
            Value::Null => json!({}),
            Value::Object(map) => Value::Object(map),
            other => json!({ "value": other }),
        };

        let event = AuditEvent {
            id: Uuid::new_v4(),
            user_id,
            action,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details,
            ip_address: origin.and_then(|o| o.ip.clone()),
            user_agent: origin.and_then(|o| o.user_agent.clone()).unwrap_or_default(),
            timestamp: utc_now(),
        };

        sqlx::query(
            "INSERT INTO audit_log (id, user_id, action, resource_type, resource_id, details, ip_address, user_agent, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.user_id.map(|id| id.to_string()))
        .bind(event.action.as_str())
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(event.details.to_string())
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(fmt_datetime(event.timestamp))
        .execute(&self.pool)
        .await
        .map_err(|err| {
            tracing::warn!(action = %event.action, error = %err, "failed to persist audit event");
            AppError::audit_write(err.to_string())
        })?;

        // no subscribers is fine
        let _ = self.bus.send(event.clone());
        Ok(event)
    }

    /// Records an event whose resource labels come from a [`Loggable`] entity.
    pub async fn record_entity<T: Loggable>(
        &self,
        user_id: Option<Uuid>,
        action: AuditAction,
        entity: &T,
        details: Value,
        origin: Option<&RequestContext>,
    ) -> AppResult<AuditEvent> {
        self.record(
            user_id,
            action,
            T::entity_type(),
            &entity.subject_id().to_string(),
            details,
            origin,
        )
        .await
    }

    /// Newest first, optionally filtered by user and action.
    pub async fn list(&self, query: &AuditQuery) -> AppResult<Vec<AuditEvent>> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);

        let rows = sqlx::query(
            "SELECT id, user_id, action, resource_type, resource_id, details, ip_address, user_agent, timestamp \
             FROM audit_log \
             WHERE (?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR action = ?2) \
             ORDER BY timestamp DESC, rowid DESC LIMIT ?3",
        )
        .bind(query.user_id.map(|id| id.to_string()))
        .bind(query.action.map(|a| a.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_event_from_row).collect()
    }
}

/// Mirrors persisted audit events into the `audit` tracing target.
pub async fn start_audit_listener(mut rx: broadcast::Receiver<AuditEvent>) {
    tracing::info!("audit listener started");
    loop {
        match rx.recv().await {
            Ok(event) => tracing::info!(
                target: "audit",
                user_id = ?event.user_id,
                action = %event.action,
                resource_type = %event.resource_type,
                resource_id = %event.resource_id,
                ip = ?event.ip_address,
                "audit event"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "audit listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
