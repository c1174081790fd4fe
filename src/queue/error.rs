use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queued request not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid stored request: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::SerializationError(err.to_string())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Outcome of replaying one queued request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// Worth retrying on a later drain (network down, 5xx, timeout)
    #[error("Transient replay failure: {0}")]
    Transient(String),

    /// The backend refused the request; retrying cannot help
    #[error("Permanent replay failure: {0}")]
    Permanent(String),
}
