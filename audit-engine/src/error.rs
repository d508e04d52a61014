use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit entry validation failed: {0}")]
    ValidationError(String),

    #[error("Audit storage error: {0}")]
    StorageError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;
