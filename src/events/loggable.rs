use serde::Serialize;
use uuid::Uuid;

/// Trait for entities that can be named in the audit trail.
/// Implement this on a model to record events about it with
/// [`AuditRecorder::record_entity`](super::AuditRecorder::record_entity).
pub trait Loggable: Serialize + Send + Sync {
    /// The label stored in `audit_log.resource_type` (e.g. "role", "resource")
    fn entity_type() -> &'static str;

    /// The id stored in `audit_log.resource_id`
    fn subject_id(&self) -> Uuid;
}
