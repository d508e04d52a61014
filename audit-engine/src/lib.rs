//! Audit logging engine for RustCare Verify
//!
//! This module provides the audit trail surface used by the verification
//! pipeline. Every state change, provider outcome, and manual correction is
//! recorded as a structured [`AuditEvent`] through an [`AuditSink`].
//!
//! Sinks are best-effort by contract: a failure to record an audit event is
//! logged and swallowed, and must never roll back the pipeline's primary
//! state change. Event details carry summaries (field names, confidence
//! statistics, error categories), never raw member identifiers or other
//! protected health information.
//!
//! # Example
//!
//! ```rust
//! use audit_engine::{AuditEvent, AuditSink, MemoryAuditSink};
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = MemoryAuditSink::new();
//!     let event = AuditEvent::new(
//!         "verification.eligibility.completed",
//!         "verification_record",
//!         Uuid::new_v4(),
//!         json!({ "status": "verified", "cached": false }),
//!     );
//!     sink.record(event).await.ok();
//! }
//! ```

pub mod entry;
pub mod error;
pub mod sink;

pub use entry::*;
pub use error::*;
pub use sink::*;
