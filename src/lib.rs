//! Client-side upload and media-processing pipeline.
//!
//! Files picked by an end user are validated, optionally transformed
//! (resize, re-encode, thumbnail), transferred to object storage through
//! backend-issued write targets and finally registered with the owning
//! application server.

pub mod config;
pub mod integrity;
pub mod metrics;
pub mod network;
pub mod orchestrator;
pub mod queue;
pub mod transfer;
pub mod transform;
pub mod validation;

pub use config::{ConfigError, UploadConfig};
pub use orchestrator::{
    EntityContext, PipelineError, UploadOrchestrator, WorkflowKind, WorkflowResult,
};
pub use validation::{CandidateFile, ValidationOutcome};
