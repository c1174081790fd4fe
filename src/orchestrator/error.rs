use crate::orchestrator::types::{PipelineStage, WorkflowKind};
use crate::transfer::{StoredObject, TransferError};
use crate::transform::TransformError;
use crate::validation::ValidationOutcome;
use thiserror::Error;

/// The owning backend did not register a stored object
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfirmationError {
    #[error("Confirmation of {object_key} rejected with {status}: {message}")]
    Rejected {
        status: u16,
        message: String,
        object_key: String,
    },

    #[error("Confirmation of {object_key} failed: {message}")]
    Network { message: String, object_key: String },

    #[error("Confirmation of {object_key} could not be queued: {message}")]
    Queue { message: String, object_key: String },
}

impl ConfirmationError {
    /// Key of the stored object that is now unreferenced
    pub fn object_key(&self) -> &str {
        match self {
            ConfirmationError::Rejected { object_key, .. }
            | ConfirmationError::Network { object_key, .. }
            | ConfirmationError::Queue { object_key, .. } => object_key,
        }
    }
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("File rejected: {}", .0.error_codes().join(", "))]
    Validation(ValidationOutcome),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),

    #[error("Deferred until back online (request {request_id})")]
    OfflineQueued { request_id: String },

    #[error("Cancelled")]
    Cancelled,
}

impl StageError {
    /// Cancellation reported by any stage collapses to `Cancelled`
    pub(crate) fn normalized(self) -> Self {
        match self {
            StageError::Transfer(TransferError::Cancelled)
            | StageError::Transform(TransformError::Cancelled) => StageError::Cancelled,
            other => other,
        }
    }
}

#[derive(Error, Debug)]
#[error("{workflow} upload of {file_name} failed while {stage}: {kind}")]
pub struct PipelineError {
    pub workflow: WorkflowKind,
    pub stage: PipelineStage,
    pub file_name: String,
    pub kind: StageError,
    /// Primary object written before the failure
    pub stored: Option<StoredObject>,
    pub thumbnail: Option<StoredObject>,
}

impl PipelineError {
    /// Whether running the workflow again may succeed
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            StageError::Transfer(e) => e.is_retryable() || e.requires_new_target(),
            StageError::Confirmation(ConfirmationError::Network { .. }) => true,
            _ => false,
        }
    }

    /// Queued for replay rather than failed
    pub fn is_deferred(&self) -> bool {
        matches!(self.kind, StageError::OfflineQueued { .. })
    }

    pub fn validation(&self) -> Option<&ValidationOutcome> {
        match &self.kind {
            StageError::Validation(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Stored object left without an owner, if the failure happened after
    /// the primary object was written
    pub fn orphaned_object_key(&self) -> Option<&str> {
        match &self.kind {
            StageError::Confirmation(e) => Some(e.object_key()),
            StageError::OfflineQueued { .. } => None,
            _ => self.stored.as_ref().map(|s| s.object_key.as_str()),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
