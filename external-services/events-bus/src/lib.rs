//! Notification bus for RustCare Verify
//!
//! Carries status-change and progress events from the verification pipeline
//! to external collaborators (real-time UI updates, card-image purge).
//! Publication is fire-and-forget: a delivery failure is logged and never
//! aborts the pipeline run that produced the event.
//!
//! Backends:
//! - **In-Memory**: captures events in process, used by tests and
//!   single-node deployments
//! - **NATS**: cross-service delivery with subject-per-record topics
//!
//! # Example
//!
//! ```rust
//! use events_bus::{InMemoryEventsBus, NotificationChannel, topics};
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryEventsBus::new();
//! let record_id = Uuid::new_v4();
//!
//! bus.publish(
//!     &topics::verification_status(record_id),
//!     json!({ "status": "verified", "settled": true }),
//! )
//! .await?;
//!
//! assert_eq!(bus.published().await.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod error;
pub mod event;
pub mod nats;
pub mod topics;

pub use channel::*;
pub use error::*;
pub use event::*;
pub use nats::*;
