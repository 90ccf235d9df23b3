use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::authz::{ConditionSet, ResourceScope};
use crate::errors::AppError;
use crate::models::audit::AuditEvent;
use crate::models::rbac::{Permission, ResourceType, Role, RolePermission, UserRole};
use crate::models::resource::{Resource, ResourceAccess};
use crate::models::user::DbUser;

/// Fixed-width RFC3339 (microseconds, `Z`), so stored timestamps compare correctly as text.
pub fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp format: "YYYY-MM-DD HH:MM:SS" (with optional fractional seconds)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    match s {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_datetime(&s)?)),
        _ => Ok(None),
    }
}

fn get<T>(row: &SqliteRow, column: &str) -> Result<T, AppError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
}

fn get_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, AppError> {
    let s: String = get(row, column)?;
    Uuid::parse_str(&s).map_err(|e| AppError::internal(format!("invalid uuid in {}: {}", column, e)))
}

fn get_opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>, AppError> {
    let s: Option<String> = get(row, column)?;
    s.map(|s| Uuid::parse_str(&s).map_err(|e| AppError::internal(format!("invalid uuid in {}: {}", column, e))))
        .transpose()
}

fn get_datetime(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, AppError> {
    let s: String = get(row, column)?;
    parse_datetime(&s)
}

fn get_json(row: &SqliteRow, column: &str) -> Result<Value, AppError> {
    let s: String = get(row, column)?;
    serde_json::from_str(&s).map_err(|e| AppError::internal(format!("invalid json in {}: {}", column, e)))
}

fn col(prefix: &str, name: &str) -> String {
    format!("{prefix}{name}")
}

pub fn db_user_from_row(row: &SqliteRow) -> Result<DbUser, AppError> {
    Ok(DbUser {
        id: get_uuid(row, "id")?,
        email: get(row, "email")?,
        first_name: get(row, "first_name")?,
        last_name: get(row, "last_name")?,
        patronymic: get(row, "patronymic")?,
        password_hash: get(row, "password_hash")?,
        is_active: get(row, "is_active")?,
        is_staff: get(row, "is_staff")?,
        is_superuser: get(row, "is_superuser")?,
        date_joined: get_datetime(row, "date_joined")?,
        last_login: parse_opt_datetime(get(row, "last_login")?)?,
    })
}

pub fn resource_type_from_row(row: &SqliteRow) -> Result<ResourceType, AppError> {
    Ok(ResourceType {
        id: get_uuid(row, "id")?,
        name: get(row, "name")?,
        code: get(row, "code")?,
        description: get(row, "description")?,
    })
}

/// Reads permission columns, optionally aliased with `prefix` in joined queries.
pub fn permission_from_row_prefixed(row: &SqliteRow, prefix: &str) -> Result<Permission, AppError> {
    let action: String = get(row, &col(prefix, "action"))?;
    Ok(Permission {
        id: get_uuid(row, &col(prefix, "id"))?,
        codename: get(row, &col(prefix, "codename"))?,
        name: get(row, &col(prefix, "name"))?,
        resource_type_id: get_uuid(row, &col(prefix, "resource_type_id"))?,
        action: action.parse().map_err(AppError::internal)?,
        description: get(row, &col(prefix, "description"))?,
    })
}

pub fn permission_from_row(row: &SqliteRow) -> Result<Permission, AppError> {
    permission_from_row_prefixed(row, "")
}

pub fn role_from_row_prefixed(row: &SqliteRow, prefix: &str) -> Result<Role, AppError> {
    Ok(Role {
        id: get_uuid(row, &col(prefix, "id"))?,
        name: get(row, &col(prefix, "name"))?,
        code: get(row, &col(prefix, "code"))?,
        description: get(row, &col(prefix, "description"))?,
        is_admin: get(row, &col(prefix, "is_admin"))?,
    })
}

pub fn role_from_row(row: &SqliteRow) -> Result<Role, AppError> {
    role_from_row_prefixed(row, "")
}

pub fn role_permission_from_row(row: &SqliteRow) -> Result<RolePermission, AppError> {
    let conditions = ConditionSet::try_from(get_json(row, "conditions")?).map_err(AppError::internal)?;
    Ok(RolePermission {
        id: get_uuid(row, "id")?,
        role_id: get_uuid(row, "role_id")?,
        permission_id: get_uuid(row, "permission_id")?,
        conditions,
    })
}

pub fn user_role_from_row(row: &SqliteRow) -> Result<UserRole, AppError> {
    let resource_scope = ResourceScope::try_from(get_json(row, "resource_scope")?).map_err(AppError::internal)?;
    Ok(UserRole {
        id: get_uuid(row, "id")?,
        user_id: get_uuid(row, "user_id")?,
        role_id: get_uuid(row, "role_id")?,
        assigned_at: get_datetime(row, "assigned_at")?,
        assigned_by: get_opt_uuid(row, "assigned_by")?,
        resource_scope,
    })
}

pub fn resource_from_row(row: &SqliteRow) -> Result<Resource, AppError> {
    Ok(Resource {
        id: get_uuid(row, "id")?,
        resource_type_id: get_uuid(row, "resource_type_id")?,
        name: get(row, "name")?,
        description: get(row, "description")?,
        owner_id: get_uuid(row, "owner_id")?,
        metadata: get_json(row, "metadata")?,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
        is_active: get(row, "is_active")?,
    })
}

pub fn resource_access_from_row(row: &SqliteRow) -> Result<ResourceAccess, AppError> {
    let conditions = ConditionSet::try_from(get_json(row, "conditions")?).map_err(AppError::internal)?;
    Ok(ResourceAccess {
        id: get_uuid(row, "id")?,
        user_id: get_uuid(row, "user_id")?,
        resource_id: get_uuid(row, "resource_id")?,
        permission_id: get_uuid(row, "permission_id")?,
        granted_at: get_datetime(row, "granted_at")?,
        granted_by: get_opt_uuid(row, "granted_by")?,
        conditions,
        expires_at: get_datetime(row, "expires_at")?,
    })
}

pub fn audit_event_from_row(row: &SqliteRow) -> Result<AuditEvent, AppError> {
    let action: String = get(row, "action")?;
    Ok(AuditEvent {
        id: get_uuid(row, "id")?,
        user_id: get_opt_uuid(row, "user_id")?,
        action: action.parse().map_err(AppError::internal)?,
        resource_type: get(row, "resource_type")?,
        resource_id: get(row, "resource_id")?,
        details: get_json(row, "details")?,
        ip_address: get(row, "ip_address")?,
        user_agent: get(row, "user_agent")?,
        timestamp: get_datetime(row, "timestamp")?,
    })
}
