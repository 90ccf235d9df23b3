use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub patronymic: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// Superusers and staff bypass permission resolution.
    pub fn is_elevated(&self) -> bool {
        self.is_superuser || self.is_staff
    }

    pub fn full_name(&self) -> String {
        format!("{} {} {}", self.last_name, self.first_name, self.patronymic)
            .trim()
            .to_string()
    }
}

impl crate::events::Loggable for User {
    fn entity_type() -> &'static str { "user" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone)]
pub struct DbUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub patronymic: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<DbUser> for User {
    fn from(value: DbUser) -> Self {
        User {
            id: value.id,
            email: value.email,
            first_name: value.first_name,
            last_name: value.last_name,
            patronymic: value.patronymic,
            is_active: value.is_active,
            is_staff: value.is_staff,
            is_superuser: value.is_superuser,
            date_joined: value.date_joined,
            last_login: value.last_login,
        }
    }
}

/// Fields needed to insert a user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub patronymic: String,
    pub password_hash: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "ivan@example.com")]
    pub email: String,
    #[schema(example = "S3curePassw0rd")]
    pub password: String,
    #[schema(example = "S3curePassw0rd")]
    pub password2: String,
    #[schema(example = "Ivan")]
    pub first_name: String,
    #[schema(example = "Petrov")]
    pub last_name: String,
    #[serde(default)]
    pub patronymic: Option<String>,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err(AppError::bad_request("a valid email is required"));
        }
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(AppError::bad_request("first_name and last_name are required"));
        }
        if self.password != self.password2 {
            return Err(AppError::bad_request("passwords do not match"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "ivan@example.com")]
    pub email: String,
    #[schema(example = "S3curePassw0rd")]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProfileUpdateRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub patronymic: Option<String>,
}

impl ProfileUpdateRequest {
    pub fn updated_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.first_name.is_some() {
            fields.push("first_name");
        }
        if self.last_name.is_some() {
            fields.push("last_name");
        }
        if self.patronymic.is_some() {
            fields.push("patronymic");
        }
        fields
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    /// Access token for the `Authorization: Bearer` header.
    pub token: String,
    /// Longer-lived token accepted only by `/api/auth/refresh`.
    pub refresh: String,
    pub user: User,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LogoutRequest {
    /// Refresh token to revoke along with the access token.
    pub refresh: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Profile {
    #[serde(flatten)]
    pub user: User,
    pub full_name: String,
    pub roles: Vec<String>,
}
