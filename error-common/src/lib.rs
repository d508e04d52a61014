//! Common error handling utilities for RustCare Verify
//!
//! This module provides the standardized error taxonomy and error codes
//! shared across the verification workspace. Every failure in the pipeline
//! resolves into one of a small set of categories so that callers, audit
//! trails, and retry machinery all agree on how an error is handled.
//!
//! # Error Categories
//!
//! - **Validation**: malformed or out-of-range input, rejected synchronously
//! - **StateConflict**: illegal lifecycle transitions, duplicate triggers
//! - **Authorization**: caller does not own the record's case
//! - **TransientProvider**: network/timeout/throttling errors, retried
//! - **PermanentProvider**: unrecoverable provider errors, recorded immediately
//! - **BusinessRule**: domain rule violations (e.g. override consistency)
//! - **NotFound** / **Conflict** / **Internal**: storage and infrastructure

pub mod codes;
pub mod types;

pub use types::*;
