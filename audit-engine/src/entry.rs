// Audit event types and structures
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single audit trail entry.
///
/// `action` is a dotted event name (e.g. `verification.override.applied`),
/// `resource_type`/`resource_id` identify the entity acted on, and
/// `details` is a structured JSON summary of what happened. Details must
/// not contain raw protected health information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Uuid,
    /// Acting principal, when the action was user-initiated.
    pub actor_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: Uuid,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id,
            actor_id: None,
            details,
            recorded_at: Utc::now(),
        }
    }

    /// Attach the acting principal to this event.
    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }
}
