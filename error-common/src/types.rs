use serde::{Deserialize, Serialize};
use std::fmt;

/// Error category enumeration shared by every crate in the workspace.
///
/// Categories decide how a failure is handled: transient provider errors
/// are retried, permanent provider errors are recorded immediately, and
/// everything else is surfaced synchronously to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Input validation and data format errors
    Validation,
    /// Illegal lifecycle transition or duplicate trigger
    StateConflict,
    /// Permission and access control errors
    Authorization,
    /// Network, timeout, and throttling errors from an external provider
    TransientProvider,
    /// Unrecoverable errors from an external provider
    PermanentProvider,
    /// Domain-specific business rule violations
    BusinessRule,
    /// Requested entity does not exist
    NotFound,
    /// Concurrent modification detected
    Conflict,
    /// Infrastructure and system-level errors
    Internal,
}

impl ErrorCategory {
    /// Whether failures in this category are candidates for automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientProvider)
    }

    /// Whether failures in this category are rejected synchronously,
    /// before any record mutation takes place.
    pub fn is_synchronous_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation | Self::StateConflict | Self::Authorization | Self::BusinessRule
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::StateConflict => "state_conflict",
            Self::Authorization => "authorization",
            Self::TransientProvider => "transient_provider",
            Self::PermanentProvider => "permanent_provider",
            Self::BusinessRule => "business_rule",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured field-level error surfaced to callers.
///
/// Synchronously rejected failures (validation, business rules) carry the
/// offending field name alongside a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
