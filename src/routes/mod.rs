pub mod access;
pub mod audit;
pub mod auth;
pub mod health;
pub mod rbac;
pub mod resources;
pub mod system;

use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::authz::PolicyEvaluator;
use crate::errors::{AppError, AppResult};
use crate::models::user::User;

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Guards administrative endpoints: active and superuser or admin-role holder.
pub(crate) async fn require_admin(state: &AppState, user: &User) -> AppResult<()> {
    if state.engine.is_admin(user).await? {
        return Ok(());
    }
    tracing::warn!(user_id = %user.id, "administrative access denied");
    Err(AppError::permission_denied("administrator access required"))
}
