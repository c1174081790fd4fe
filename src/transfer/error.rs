use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    #[error("Storage backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Write target for {object_key} has expired")]
    TargetExpired { object_key: String },

    #[error("Invalid multipart session: {0}")]
    InvalidSession(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Offline: byte transfers cannot be queued")]
    Offline,

    #[error("Offline: request queued for replay ({request_id})")]
    OfflineQueued { request_id: String },

    #[error("Part {part_number} failed after {attempts} attempt(s): {message}")]
    PartFailed {
        part_number: u32,
        attempts: u32,
        message: String,
    },

    #[error("Offline queue error: {0}")]
    Queue(String),

    #[error("Integrity error: {0}")]
    Integrity(String),
}

impl TransferError {
    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Backend { status, .. } => *status >= 500 || *status == 429,
            TransferError::Network(_) | TransferError::Offline | TransferError::PartFailed { .. } => {
                true
            }
            _ => false,
        }
    }

    /// The write target lapsed; a fresh `transfer` call requests a new one.
    /// Never retried in place.
    pub fn requires_new_target(&self) -> bool {
        matches!(self, TransferError::TargetExpired { .. })
    }

    /// Short label used in metrics
    pub fn reason(&self) -> &'static str {
        match self {
            TransferError::Backend { .. } => "backend",
            TransferError::Network(_) => "network",
            TransferError::TargetExpired { .. } => "expired",
            TransferError::InvalidSession(_) => "invalid_session",
            TransferError::NotFound(_) => "not_found",
            TransferError::Cancelled => "cancelled",
            TransferError::Offline => "offline",
            TransferError::OfflineQueued { .. } => "queued",
            TransferError::PartFailed { .. } => "part_failed",
            TransferError::Queue(_) => "queue",
            TransferError::Integrity(_) => "integrity",
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => TransferError::Backend {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => TransferError::Network(err.to_string()),
        }
    }
}

impl From<crate::queue::QueueError> for TransferError {
    fn from(err: crate::queue::QueueError) -> Self {
        TransferError::Queue(err.to_string())
    }
}

impl From<crate::integrity::IntegrityError> for TransferError {
    fn from(err: crate::integrity::IntegrityError) -> Self {
        TransferError::Integrity(err.to_string())
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TransferError::Backend { status: 503, message: String::new() }.is_retryable());
        assert!(TransferError::Backend { status: 429, message: String::new() }.is_retryable());
        assert!(!TransferError::Backend { status: 403, message: String::new() }.is_retryable());
        assert!(TransferError::Network("reset".into()).is_retryable());
        assert!(!TransferError::NotFound("k".into()).is_retryable());
        assert!(!TransferError::Cancelled.is_retryable());
        assert!(!TransferError::OfflineQueued { request_id: "r".into() }.is_retryable());
    }

    #[test]
    fn test_expired_target_needs_fresh_transfer() {
        let expired = TransferError::TargetExpired {
            object_key: "avatars/a.webp".into(),
        };
        assert!(expired.requires_new_target());
        assert!(!expired.is_retryable());
        assert!(!TransferError::Network("reset".into()).requires_new_target());
    }
}
