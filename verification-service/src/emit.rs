//! Notification and audit emission helpers
//!
//! Both are best-effort: a publish or sink failure is logged and never
//! aborts the pipeline run or the operation that produced it.

use audit_engine::{AuditEvent, AuditSink};
use events_bus::{topics, NotificationChannel};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::VerificationRecord;

/// Pipeline progress stages with their UI percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    Started,
    ApiCalled,
    Parsing,
    Complete,
}

impl ProgressStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::ApiCalled => "api_called",
            Self::Parsing => "parsing",
            Self::Complete => "complete",
        }
    }

    pub fn percent(&self) -> u8 {
        match self {
            Self::Started => 0,
            Self::ApiCalled => 33,
            Self::Parsing => 66,
            Self::Complete => 100,
        }
    }
}

/// Publish a status-change event on the record's status topic.
///
/// The `settled` flag tells the image-purge collaborator when card
/// images are safe to drop.
pub(crate) async fn status_change(
    notifier: &Arc<dyn NotificationChannel>,
    record: &VerificationRecord,
    error_code: Option<&str>,
) {
    let mut payload = json!({
        "recordId": record.id,
        "caseId": record.case_id,
        "status": record.status,
        "settled": record.status.is_settled(),
    });
    if let Some(code) = error_code {
        payload["errorCode"] = json!(code);
    }

    let topic = topics::verification_status(record.id);
    if let Err(e) = notifier.publish(&topic, payload).await {
        tracing::warn!(record_id = %record.id, error = %e, "status notification failed");
    }
}

/// Publish a progress event on the record's progress topic.
pub(crate) async fn progress(
    notifier: &Arc<dyn NotificationChannel>,
    record_id: Uuid,
    stage: ProgressStage,
) {
    let payload = json!({
        "recordId": record_id,
        "stage": stage.name(),
        "percent": stage.percent(),
    });

    let topic = topics::verification_progress(record_id);
    if let Err(e) = notifier.publish(&topic, payload).await {
        tracing::warn!(record_id = %record_id, stage = stage.name(), error = %e, "progress notification failed");
    }
}

/// Record an audit event against a verification record.
pub(crate) async fn audit(
    sink: &Arc<dyn AuditSink>,
    action: &str,
    record_id: Uuid,
    actor_id: Option<Uuid>,
    details: serde_json::Value,
) {
    let mut event = AuditEvent::new(action, "verification_record", record_id, details);
    if let Some(actor) = actor_id {
        event = event.with_actor(actor);
    }
    if let Err(e) = sink.record(event).await {
        tracing::warn!(record_id = %record_id, action, error = %e, "audit sink failed");
    }
}
