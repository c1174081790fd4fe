//! Upload workflows: validate, transform, transfer and confirm one file or a batch

mod confirmation;
mod error;
mod observer;
mod orchestrator;
mod state_machine;
mod types;
mod workflow;

pub use confirmation::{
    ConfirmationBackend, ConfirmationRequest, HttpConfirmationBackend, MemoryConfirmationBackend,
    ReplayRouter,
};
pub use error::{ConfirmationError, PipelineError, PipelineResult, StageError};
pub use observer::PipelineObserver;
pub use orchestrator::UploadOrchestrator;
pub use state_machine::{InvalidTransition, PipelineStateMachine};
pub use types::{
    BatchFailure, BatchItem, BatchMode, BatchOptions, BatchReport, BatchSummary, EntityContext,
    PipelineEvent, PipelineStage, PipelineState, RunOptions, StageTimings, WorkflowKind,
    WorkflowResult,
};
pub use workflow::{ConfirmationKind, WorkflowProfile, WorkflowRegistry};
