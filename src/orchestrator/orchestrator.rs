use crate::metrics::recorder::{record_validation, record_workflow_complete, record_workflow_failed};
use crate::network::NetworkTracker;
use crate::orchestrator::confirmation::{ConfirmationBackend, ConfirmationRequest};
use crate::orchestrator::error::{ConfirmationError, PipelineError, PipelineResult, StageError};
use crate::orchestrator::state_machine::PipelineStateMachine;
use crate::orchestrator::types::{
    BatchFailure, BatchItem, BatchMode, BatchOptions, BatchReport, BatchSummary, EntityContext,
    PipelineEvent, PipelineStage, RunOptions, StageTimings, WorkflowKind, WorkflowResult,
};
use crate::orchestrator::workflow::{WorkflowProfile, WorkflowRegistry};
use crate::queue::OfflineQueue;
use crate::transfer::{ObjectPayload, StoredObject, TransferClient, TransferOptions, TransferProgress};
use crate::transform::{ImageAsset, ImageTransformer, TransformMetadata};
use crate::validation::{CandidateFile, FileValidator, MediaCategory, ValidationRule};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;

/// Sequences validate, transform, transfer and confirm for each workflow kind
pub struct UploadOrchestrator {
    registry: WorkflowRegistry,
    transfer: Arc<TransferClient>,
    transformer: ImageTransformer,
    confirmations: Arc<dyn ConfirmationBackend>,
    network: Option<Arc<NetworkTracker>>,
    queue: Option<Arc<OfflineQueue>>,
    rules: Vec<Arc<dyn ValidationRule>>,
}

/// What the transfer stage writes for one file
struct PreparedUpload {
    primary: ObjectPayload,
    thumbnail: Option<ObjectPayload>,
    metadata: Option<TransformMetadata>,
}

/// Objects already in storage, kept for error reporting
#[derive(Default)]
struct Written {
    stored: Option<StoredObject>,
    thumbnail: Option<StoredObject>,
}

impl UploadOrchestrator {
    pub fn new(transfer: Arc<TransferClient>, confirmations: Arc<dyn ConfirmationBackend>) -> Self {
        Self {
            registry: WorkflowRegistry::default(),
            transfer,
            transformer: ImageTransformer::new(),
            confirmations,
            network: None,
            queue: None,
            rules: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: WorkflowRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_network(mut self, tracker: Arc<NetworkTracker>) -> Self {
        self.network = Some(tracker);
        self
    }

    pub fn with_queue(mut self, queue: Arc<OfflineQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Extra validation rule applied in every workflow
    pub fn with_rule(mut self, rule: Arc<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub fn transfer_client(&self) -> &TransferClient {
        &self.transfer
    }

    fn is_online(&self) -> bool {
        self.network.as_ref().map_or(true, |n| n.is_online())
    }

    /// Run one file through the workflow
    pub async fn run(
        &self,
        kind: WorkflowKind,
        context: &EntityContext,
        file: &CandidateFile,
        options: &RunOptions,
    ) -> PipelineResult<WorkflowResult> {
        let started = Instant::now();
        let machine = PipelineStateMachine::new();
        let mut written = Written::default();
        tracing::debug!("Starting {} workflow for {}", kind, file.name);

        match self
            .execute(kind, context, file, options, &machine, &mut written)
            .await
        {
            Ok(result) => {
                record_workflow_complete(kind.as_str(), started.elapsed());
                tracing::info!(
                    "{} workflow stored {} as {} in {}ms",
                    kind,
                    file.name,
                    result.stored.object_key,
                    result.timings.total_ms
                );
                Ok(result)
            }
            Err(error) => {
                let stage = machine.stage();
                advance(
                    &machine,
                    PipelineEvent::StageFailed {
                        error: error.to_string(),
                    },
                );
                record_workflow_failed(kind.as_str(), stage.as_str());

                let error = PipelineError {
                    workflow: kind,
                    stage,
                    file_name: file.name.clone(),
                    kind: error.normalized(),
                    stored: written.stored,
                    thumbnail: written.thumbnail,
                };
                if error.is_deferred() {
                    tracing::info!("{}", error);
                } else {
                    tracing::warn!("{}", error);
                }
                Err(error)
            }
        }
    }

    async fn execute(
        &self,
        kind: WorkflowKind,
        context: &EntityContext,
        file: &CandidateFile,
        options: &RunOptions,
        machine: &PipelineStateMachine,
        written: &mut Written,
    ) -> Result<WorkflowResult, StageError> {
        let started = Instant::now();
        let profile = self.registry.profile(kind);
        let mut timings = StageTimings::default();

        // 1. Validate
        advance(machine, PipelineEvent::Begin);
        if options.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let stage_start = Instant::now();
        let validator = self
            .rules
            .iter()
            .cloned()
            .fold(FileValidator::new(profile.validator.clone()), FileValidator::with_rule);
        let validation = validator.validate(file);
        timings.validation_ms = elapsed_ms(stage_start);

        record_validation(kind.as_str(), validation.is_acceptable, validation.errors.len());
        if let Some(observer) = &options.observer {
            observer.on_validation_complete(&file.name, &validation);
        }
        if !validation.is_acceptable {
            return Err(StageError::Validation(validation));
        }

        // 2. Transform, images only
        let is_image = MediaCategory::of(
            validation
                .metadata
                .sniffed_type
                .as_deref()
                .unwrap_or(&file.media_type),
        ) == MediaCategory::Image;
        let transform_options = profile
            .transform
            .as_ref()
            .filter(|_| is_image && !options.skip_transform);
        advance(
            machine,
            PipelineEvent::ValidationPassed {
                needs_transform: transform_options.is_some(),
            },
        );

        let prepared = match transform_options {
            Some(transform_options) => {
                let stage_start = Instant::now();
                let transformed = self
                    .transformer
                    .transform(file.content.clone(), transform_options.clone(), &options.cancel)
                    .await?;
                timings.transform_ms = elapsed_ms(stage_start);

                if let Some(observer) = &options.observer {
                    observer.on_transform_complete(&file.name, &transformed.metadata);
                }
                advance(machine, PipelineEvent::TransformDone);

                PreparedUpload {
                    primary: asset_payload(&file.name, "", &transformed.primary),
                    thumbnail: transformed
                        .thumbnail
                        .as_ref()
                        .map(|thumb| asset_payload(&file.name, "-thumb", thumb)),
                    metadata: Some(transformed.metadata),
                }
            }
            None => PreparedUpload {
                primary: ObjectPayload::new(file.name.clone(), file.media_type.clone(), file.content.clone()),
                thumbnail: None,
                metadata: None,
            },
        };

        // 3. Transfer
        let stage_start = Instant::now();
        let (stored, thumbnail) = self
            .store(kind, profile, context, &prepared, options, written)
            .await?;
        timings.transfer_ms = elapsed_ms(stage_start);

        if let Some(observer) = &options.observer {
            observer.on_transfer_complete(&file.name, &stored);
        }
        advance(machine, PipelineEvent::TransferDone);

        // 4. Confirm
        if options.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        let stage_start = Instant::now();
        let request = ConfirmationRequest::new(
            profile.confirmation,
            context,
            &file.name,
            &file.media_type,
            &stored,
            thumbnail.as_ref(),
        );
        let confirmation = self.confirm(&request).await?;
        timings.confirm_ms = elapsed_ms(stage_start);
        advance(machine, PipelineEvent::ConfirmationDone);

        timings.total_ms = elapsed_ms(started);
        Ok(WorkflowResult {
            workflow: kind,
            file_name: file.name.clone(),
            media_type: file.media_type.clone(),
            original_byte_length: file.size,
            validation,
            transform: prepared.metadata,
            stored,
            thumbnail,
            confirmation,
            timings,
        })
    }

    async fn store(
        &self,
        kind: WorkflowKind,
        profile: &WorkflowProfile,
        context: &EntityContext,
        prepared: &PreparedUpload,
        options: &RunOptions,
        written: &mut Written,
    ) -> Result<(StoredObject, Option<StoredObject>), StageError> {
        let base = |category: String| {
            context
                .as_metadata()
                .into_iter()
                .fold(TransferOptions::new(category), |opts, (key, value)| {
                    opts.with_metadata(key, value)
                })
                .public(profile.is_public)
                .with_tag(kind.as_str())
                .with_cancel(options.cancel.clone())
        };

        let mut primary_options = base(profile.category.clone());
        if let Some(observer) = options.observer.clone() {
            let file_name = prepared.primary.file_name.clone();
            primary_options = primary_options.on_progress(Arc::new(move |progress: TransferProgress| {
                observer.on_transfer_progress(&file_name, &progress)
            }));
        }
        let stored = self.transfer.transfer(&prepared.primary, &primary_options).await?;
        written.stored = Some(stored.clone());

        let thumbnail = match &prepared.thumbnail {
            Some(payload) => {
                let thumb_options = base(format!("{}/thumbnails", profile.category));
                Some(self.transfer.transfer(payload, &thumb_options).await?)
            }
            None => None,
        };
        written.thumbnail = thumbnail.clone();

        Ok((stored, thumbnail))
    }

    /// Re-attempt confirmation of objects a failed run already stored.
    ///
    /// Pass the `stored` and `thumbnail` of the [`PipelineError`]; nothing is
    /// transferred again. Offline, the confirmation is queued as in `run`.
    pub async fn confirm_stored(
        &self,
        kind: WorkflowKind,
        context: &EntityContext,
        file: &CandidateFile,
        stored: &StoredObject,
        thumbnail: Option<&StoredObject>,
    ) -> PipelineResult<serde_json::Value> {
        let profile = self.registry.profile(kind);
        let request = ConfirmationRequest::new(
            profile.confirmation,
            context,
            &file.name,
            &file.media_type,
            stored,
            thumbnail,
        );

        match self.confirm(&request).await {
            Ok(confirmation) => {
                tracing::info!("Confirmed {} on retry", stored.object_key);
                Ok(confirmation)
            }
            Err(stage_error) => {
                let error = PipelineError {
                    workflow: kind,
                    stage: PipelineStage::Confirming,
                    file_name: file.name.clone(),
                    kind: stage_error,
                    stored: Some(stored.clone()),
                    thumbnail: thumbnail.cloned(),
                };
                tracing::warn!("{}", error);
                Err(error)
            }
        }
    }

    async fn confirm(&self, request: &ConfirmationRequest) -> Result<serde_json::Value, StageError> {
        if self.is_online() {
            return Ok(self.confirmations.confirm(request).await?);
        }

        let Some(queue) = &self.queue else {
            return Err(ConfirmationError::Network {
                message: "offline and no request queue configured".to_string(),
                object_key: request.object_key.clone(),
            }
            .into());
        };

        let queued = request.to_queued();
        queue
            .enqueue_request(&queued)
            .await
            .map_err(|e| ConfirmationError::Queue {
                message: e.to_string(),
                object_key: request.object_key.clone(),
            })?;
        tracing::info!(
            "Offline, queued confirmation of {} as {}",
            request.object_key,
            queued.id
        );
        Err(StageError::OfflineQueued {
            request_id: queued.id,
        })
    }

    /// Run files in groups, each group concurrently and the groups in
    /// sequence. Every item runs under its own workflow kind.
    pub async fn run_batch(
        &self,
        items: Vec<BatchItem>,
        options: BatchOptions,
    ) -> PipelineResult<BatchReport> {
        let total = items.len();
        let group_size = options.group_size.max(1);
        let mut results = Vec::new();
        let mut failures: Vec<BatchFailure> = Vec::new();

        for (group_index, group) in items.chunks(group_size).enumerate() {
            let outcomes = join_all(
                group
                    .iter()
                    .map(|item| self.run(item.kind, &item.context, &item.file, &options.run)),
            )
            .await;

            for (offset, outcome) in outcomes.into_iter().enumerate() {
                match outcome {
                    Ok(result) => results.push(result),
                    Err(error) => failures.push(BatchFailure {
                        index: group_index * group_size + offset,
                        error,
                    }),
                }
            }

            if options.mode == BatchMode::AbortOnError && !failures.is_empty() {
                let first = failures.swap_remove(0);
                tracing::warn!(
                    "Batch of {} aborted at item {} in group {}",
                    total,
                    first.index,
                    group_index
                );
                return Err(first.error);
            }
        }

        let summary = BatchSummary::from_results(total, &results);
        tracing::info!(
            "Batch of {} files: {} succeeded, {} failed",
            total,
            summary.succeeded,
            summary.failed
        );
        Ok(BatchReport {
            results,
            failures,
            summary,
        })
    }
}

fn advance(machine: &PipelineStateMachine, event: PipelineEvent) {
    if let Err(e) = machine.transition(event) {
        tracing::error!("{}", e);
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Payload for an encoded asset, named after the source file
fn asset_payload(source_name: &str, suffix: &str, asset: &ImageAsset) -> ObjectPayload {
    let stem = match source_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => source_name,
    };
    ObjectPayload::new(
        format!("{}{}.{}", stem, suffix, asset.format.extension()),
        asset.format.mime_type(),
        asset.bytes.clone(),
    )
}
