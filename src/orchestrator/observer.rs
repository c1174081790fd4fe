use crate::transfer::{StoredObject, TransferProgress};
use crate::transform::TransformMetadata;
use crate::validation::ValidationOutcome;

/// Synchronous, observational callbacks fired as a file moves through the pipeline
pub trait PipelineObserver: Send + Sync {
    fn on_validation_complete(&self, _file_name: &str, _outcome: &ValidationOutcome) {}

    fn on_transform_complete(&self, _file_name: &str, _metadata: &TransformMetadata) {}

    fn on_transfer_progress(&self, _file_name: &str, _progress: &TransferProgress) {}

    fn on_transfer_complete(&self, _file_name: &str, _stored: &StoredObject) {}
}
