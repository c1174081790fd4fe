use crate::orchestrator::error::PipelineError;
use crate::orchestrator::observer::PipelineObserver;
use crate::transfer::StoredObject;
use crate::transform::TransformMetadata;
use crate::validation::{CandidateFile, ValidationOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    Avatar,
    Document,
    TabularImport,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Avatar => "avatar",
            WorkflowKind::Document => "document",
            WorkflowKind::TabularImport => "tabular-import",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business entity the upload belongs to, supplied by the host application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

impl EntityContext {
    pub fn for_contact(contact_id: impl Into<String>) -> Self {
        Self {
            contact_id: Some(contact_id.into()),
            ..Self::default()
        }
    }

    pub fn for_company(company_id: impl Into<String>) -> Self {
        Self {
            company_id: Some(company_id.into()),
            ..Self::default()
        }
    }

    pub fn for_deal(deal_id: impl Into<String>) -> Self {
        Self {
            deal_id: Some(deal_id.into()),
            ..Self::default()
        }
    }

    pub fn uploaded_by(mut self, user_id: impl Into<String>) -> Self {
        self.uploaded_by = Some(user_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Flattened string pairs attached to stored objects as metadata
    pub fn as_metadata(&self) -> HashMap<String, String> {
        let mut metadata = self.extra.clone();
        let ids = [
            ("contactId", &self.contact_id),
            ("companyId", &self.company_id),
            ("dealId", &self.deal_id),
            ("uploadedBy", &self.uploaded_by),
        ];
        for (key, value) in ids {
            if let Some(value) = value {
                metadata.insert(key.to_string(), value.clone());
            }
        }
        metadata
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Validating,
    Transforming,
    Transferring,
    Confirming,
    Done,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Validating => "validating",
            PipelineStage::Transforming => "transforming",
            PipelineStage::Transferring => "transferring",
            PipelineStage::Confirming => "confirming",
            PipelineStage::Done => "done",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Validating,
    Transforming,
    Transferring,
    Confirming,
    Done,
    Failed { stage: PipelineStage, error: String },
}

impl PipelineState {
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineState::Idle => PipelineStage::Idle,
            PipelineState::Validating => PipelineStage::Validating,
            PipelineState::Transforming => PipelineStage::Transforming,
            PipelineState::Transferring => PipelineStage::Transferring,
            PipelineState::Confirming => PipelineStage::Confirming,
            PipelineState::Done => PipelineStage::Done,
            PipelineState::Failed { stage, .. } => *stage,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Begin,
    ValidationPassed { needs_transform: bool },
    TransformDone,
    TransferDone,
    ConfirmationDone,
    StageFailed { error: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimings {
    pub total_ms: u64,
    pub validation_ms: u64,
    pub transform_ms: u64,
    pub transfer_ms: u64,
    pub confirm_ms: u64,
}

#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub workflow: WorkflowKind,
    pub file_name: String,
    pub media_type: String,
    pub original_byte_length: u64,
    pub validation: ValidationOutcome,
    pub transform: Option<TransformMetadata>,
    pub stored: StoredObject,
    pub thumbnail: Option<StoredObject>,
    /// Record returned by the owning backend, passed through unmodified
    pub confirmation: serde_json::Value,
    pub timings: StageTimings,
}

/// Per-run switches
#[derive(Clone, Default)]
pub struct RunOptions {
    pub skip_transform: bool,
    pub cancel: CancellationToken,
    pub observer: Option<Arc<dyn PipelineObserver>>,
}

impl RunOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn skip_transform(mut self) -> Self {
        self.skip_transform = true;
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("skip_transform", &self.skip_transform)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// One (file, workflow kind, context) entry of a batch
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub file: CandidateFile,
    pub kind: WorkflowKind,
    pub context: EntityContext,
}

impl BatchItem {
    pub fn new(file: CandidateFile, kind: WorkflowKind, context: EntityContext) -> Self {
        Self { file, kind, context }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    #[default]
    ContinueOnError,
    AbortOnError,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub mode: BatchMode,
    /// Files run concurrently per group
    pub group_size: usize,
    pub run: RunOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            mode: BatchMode::ContinueOnError,
            group_size: 3,
            run: RunOptions::default(),
        }
    }
}

#[derive(Debug)]
pub struct BatchFailure {
    /// Position in the submitted batch
    pub index: usize,
    pub error: PipelineError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub original_bytes: u64,
    pub processed_bytes: u64,
    /// Mean over successful image transforms, `None` when there were none
    pub average_size_reduction_percent: Option<f64>,
}

impl BatchSummary {
    pub fn from_results(total: usize, results: &[WorkflowResult]) -> Self {
        let reductions: Vec<f64> = results
            .iter()
            .filter_map(|r| r.transform.as_ref())
            .map(|m| m.size_reduction_percent())
            .collect();

        Self {
            total,
            succeeded: results.len(),
            failed: total - results.len(),
            original_bytes: results.iter().map(|r| r.original_byte_length).sum(),
            processed_bytes: results.iter().map(|r| r.stored.byte_length).sum(),
            average_size_reduction_percent: (!reductions.is_empty())
                .then(|| reductions.iter().sum::<f64>() / reductions.len() as f64),
        }
    }
}

#[derive(Debug)]
pub struct BatchReport {
    /// Successful runs in input order
    pub results: Vec<WorkflowResult>,
    /// Failed runs in input order
    pub failures: Vec<BatchFailure>,
    pub summary: BatchSummary,
}
