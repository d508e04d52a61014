//! Insurance verification pipeline for RustCare Verify
//!
//! Turns a photographed insurance card and/or manually entered policy data
//! into a verified (or rejected) coverage determination:
//! - Ten-state verification lifecycle with a declared transition table
//! - Document extraction with provider fallback and confidence gating
//! - Eligibility verification with caching, polynomial-backoff retries,
//!   and manual-review escalation
//! - Manual deductible/out-of-pocket overrides with full audit detail
//! - Background worker pool with a bounded job queue
//!
//! The [`VerificationService`] facade is the caller-facing surface; storage,
//! caching, notification, and audit collaborators are injected behind
//! traits with in-memory implementations for tests and single-node use.

pub mod cache;
pub mod config;
pub mod eligibility;
pub mod emit;
pub mod error;
pub mod extraction;
pub mod models;
pub mod overrides;
pub mod redact;
pub mod retry;
pub mod service;
pub mod state;
pub mod store;
pub mod worker;

pub use cache::{eligibility_cache_key, CacheStore, InMemoryCacheStore, RedisCacheStore};
pub use config::{VerificationConfig, CONFIDENCE_THRESHOLD};
pub use eligibility::{
    EligibilityPipeline, EligibilityProvider, EligibilityProviderRegistry, EligibilityRequest,
    HttpEligibilityProvider, ProviderIssue, ProviderVerification,
};
pub use error::*;
pub use extraction::{
    CardFieldExtractor, ExtractionPipeline, ExtractionProviderError, LabeledValue, RawExtraction,
    TextLine, VisionExtractionClient,
};
pub use models::*;
pub use overrides::OverrideManager;
pub use retry::{run_with_retry, BackoffStrategy, RetryFailure, RetryPolicy};
pub use service::*;
pub use state::*;
pub use store::{InMemoryRecordStore, OutcomeSection, RecordStore};
pub use worker::VerificationJob;
