//! Read-side contracts the resolution engine depends on, plus the two
//! implementations: [`SqliteStore`] for the service and [`MemoryStore`] for
//! unit tests and embedders.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::rbac::{RoleAssignment, RoleGrant};
use crate::models::resource::DirectGrant;

mod memory;
pub mod seed;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Role assignments of a user, each joined with its role.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn roles_of(&self, user_id: Uuid) -> AppResult<Vec<RoleAssignment>>;
}

/// Permission grants held by a role, each joined with its permission.
#[async_trait]
pub trait PermissionCatalog: Send + Sync {
    async fn grants_of(&self, role_id: Uuid) -> AppResult<Vec<RoleGrant>>;
}

/// Direct grants of a user that have not expired at `now`, optionally narrowed
/// to one resource.
#[async_trait]
pub trait DirectGrantStore: Send + Sync {
    async fn active_grants_of(
        &self,
        user_id: Uuid,
        resource_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<DirectGrant>>;
}

/// Everything the engine reads.
pub trait AccessStore: IdentityStore + PermissionCatalog + DirectGrantStore {}

impl<T> AccessStore for T where T: IdentityStore + PermissionCatalog + DirectGrantStore {}
