use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to connect to message broker")]
    BrokerConnectionError,

    #[error("Failed to publish event")]
    PublishError,

    #[error("Failed to serialize event payload")]
    SerializationError,

    #[error("Internal event bus error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EventBusError>;
