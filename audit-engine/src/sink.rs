//! Audit sinks
//!
//! The pipeline records audit events through the [`AuditSink`] trait so the
//! host platform can plug in its own durable trail. Recording is
//! best-effort; callers log and continue on failure.

use crate::entry::AuditEvent;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record a single audit event.
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// Sink that emits audit events as structured tracing records.
///
/// Used when the host platform scrapes audit data from the log stream
/// rather than a dedicated store.
pub struct TracingAuditSink;

impl TracingAuditSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TracingAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        tracing::info!(
            target: "audit",
            audit_id = %event.id,
            action = %event.action,
            resource_type = %event.resource_type,
            resource_id = %event.resource_id,
            actor_id = ?event.actor_id,
            details = %event.details,
            "audit event"
        );
        Ok(())
    }
}

/// In-memory audit sink for testing and development.
#[derive(Clone)]
pub struct MemoryAuditSink {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Snapshot of every recorded event, in recording order.
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.read() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Events whose action matches `action` exactly.
    pub fn events_for_action(&self, action: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        match self.events.write() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        Ok(())
    }
}
