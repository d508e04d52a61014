use error_common::ErrorCategory;
use thiserror::Error;
use uuid::Uuid;

use crate::state::VerificationStatus;

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Verification record not found: {0}")]
    RecordNotFound(Uuid),

    #[error("Verification already in progress for record {0}")]
    AlreadyInProgress(Uuid),

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: VerificationStatus,
        to: VerificationStatus,
    },

    #[error("Record fields are not editable while status is {0}")]
    FieldsLocked(VerificationStatus),

    #[error("Validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Override rejected for {field}: {message}")]
    BusinessRule { field: String, message: String },

    #[error("Access denied for record {0}")]
    AccessDenied(Uuid),

    #[error("Record version conflict on {record_id}: expected {expected}")]
    VersionConflict { record_id: Uuid, expected: u64 },

    #[error("Provider error {code}: {message}")]
    Provider {
        code: String,
        message: String,
        retryable: bool,
    },

    #[error("Verification job queue is full")]
    QueueFull,

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl VerificationError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn business_rule(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BusinessRule {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn provider(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }

    /// Error taxonomy bucket used for retry decisions and audit summaries.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RecordNotFound(_) => ErrorCategory::NotFound,
            Self::AlreadyInProgress(_) | Self::IllegalTransition { .. } | Self::FieldsLocked(_) => {
                ErrorCategory::StateConflict
            }
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::BusinessRule { .. } => ErrorCategory::BusinessRule,
            Self::AccessDenied(_) => ErrorCategory::Authorization,
            Self::VersionConflict { .. } => ErrorCategory::Conflict,
            Self::Provider { retryable, .. } => {
                if *retryable {
                    ErrorCategory::TransientProvider
                } else {
                    ErrorCategory::PermanentProvider
                }
            }
            Self::Network(_) => ErrorCategory::TransientProvider,
            Self::QueueFull | Self::Cache(_) | Self::Serialization(_) | Self::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

pub type VerificationResult<T> = Result<T, VerificationError>;
