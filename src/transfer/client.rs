use crate::metrics::recorder::{record_multipart_abort, record_part_retry, TransferTimer};
use crate::network::NetworkTracker;
use crate::queue::OfflineQueue;
use crate::transfer::backend::{
    ByteTransport, CopyRequest, DeferredStorageCall, StorageBackend, MAX_DOWNLOAD_URL_TTL_SECS,
};
use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::progress::ProgressTracker;
use crate::transfer::rate_limiter::BandwidthLimiter;
use crate::transfer::types::{
    CompletedPart, DownloadUrl, MultipartSession, ObjectMetadata, ObjectPayload, PartTarget,
    StoredObject, TransferOptions, TransferStrategy, WriteConfirmation,
};
use backoff::{backoff::Backoff, ExponentialBackoff};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Objects strictly larger than this use multipart
    pub multipart_threshold_bytes: u64,
    pub part_size_bytes: u64,
    pub max_concurrent_parts: usize,
    /// Retries per part after the first attempt
    pub part_max_retries: u32,
    pub retry_initial_interval_ms: u64,
    pub retry_max_interval_ms: u64,
    /// 0 means unlimited
    pub max_bytes_per_second: u64,
    pub request_timeout_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            multipart_threshold_bytes: 50 * 1024 * 1024,
            part_size_bytes: 10 * 1024 * 1024,
            max_concurrent_parts: 3,
            part_max_retries: 3,
            retry_initial_interval_ms: 200,
            retry_max_interval_ms: 5_000,
            max_bytes_per_second: 0,
            request_timeout_ms: 30_000,
        }
    }
}

impl TransferConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn part_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.retry_initial_interval_ms),
            max_interval: Duration::from_millis(self.retry_max_interval_ms),
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Object-storage client choosing single-shot or multipart per object
pub struct TransferClient {
    backend: Arc<dyn StorageBackend>,
    transport: Arc<dyn ByteTransport>,
    config: TransferConfig,
    limiter: BandwidthLimiter,
    network: Option<Arc<NetworkTracker>>,
    queue: Option<Arc<OfflineQueue>>,
}

impl TransferClient {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        transport: Arc<dyn ByteTransport>,
        config: TransferConfig,
    ) -> Self {
        let limiter = BandwidthLimiter::new(config.max_bytes_per_second);
        Self {
            backend,
            transport,
            config,
            limiter,
            network: None,
            queue: None,
        }
    }

    pub fn with_network(mut self, tracker: Arc<NetworkTracker>) -> Self {
        self.network = Some(tracker);
        self
    }

    pub fn with_queue(mut self, queue: Arc<OfflineQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn strategy_for(&self, byte_length: u64) -> TransferStrategy {
        TransferStrategy::for_size(byte_length, self.config.multipart_threshold_bytes)
    }

    fn is_online(&self) -> bool {
        self.network.as_ref().map_or(true, |n| n.is_online())
    }

    /// Write one object and return its canonical record
    pub async fn transfer(
        &self,
        payload: &ObjectPayload,
        options: &TransferOptions,
    ) -> TransferResult<StoredObject> {
        if options.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if !self.is_online() {
            return Err(TransferError::Offline);
        }

        let strategy = self.strategy_for(payload.byte_length());
        tracing::debug!(
            "Transferring {} ({} bytes, {})",
            payload.file_name,
            payload.byte_length(),
            strategy.as_str()
        );

        let timer = TransferTimer::start(strategy.as_str(), payload.byte_length());
        let result = match strategy {
            TransferStrategy::SingleShot => self.single_shot(payload, options).await,
            TransferStrategy::Multipart => self.multipart(payload, options).await,
        };

        match &result {
            Ok(stored) => {
                tracing::info!(
                    "Stored {} as {} in {:?}",
                    payload.file_name,
                    stored.object_key,
                    timer.elapsed()
                );
                timer.finish(stored.byte_length);
            }
            Err(e) => {
                tracing::warn!("Transfer of {} failed: {}", payload.file_name, e);
                timer.fail(e.reason());
            }
        }

        result
    }

    async fn single_shot(
        &self,
        payload: &ObjectPayload,
        options: &TransferOptions,
    ) -> TransferResult<StoredObject> {
        // 1. Acquire a write target
        let target = self
            .backend
            .request_write_target(&options.write_request(payload))
            .await?;
        if target.is_expired() {
            return Err(TransferError::TargetExpired {
                object_key: target.object_key,
            });
        }

        // 2. Send the bytes
        let tracker = ProgressTracker::new(payload.byte_length(), options.progress.clone());
        let tag = self
            .put_bytes(
                &target.write_url,
                &payload.content_type,
                payload.content.clone(),
                1,
                &tracker,
                &options.cancel,
            )
            .await?;

        // 3. Confirm
        if options.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        self.backend
            .confirm_write(&WriteConfirmation {
                object_key: target.object_key,
                integrity_tag: tag,
                size: payload.byte_length(),
            })
            .await
    }

    async fn multipart(
        &self,
        payload: &ObjectPayload,
        options: &TransferOptions,
    ) -> TransferResult<StoredObject> {
        let session = self
            .backend
            .initiate_multipart(&options.initiate_request(payload, self.config.part_size_bytes))
            .await?;
        tracing::debug!(
            "Multipart session {} for {} with {} part(s)",
            session.session_id,
            session.object_key,
            session.parts.len()
        );

        let result = match self.transfer_parts(&session, payload, options).await {
            Ok(_) if options.cancel.is_cancelled() => Err(TransferError::Cancelled),
            Ok(parts) => {
                self.backend
                    .complete_multipart(&session.session_id, &session.object_key, &parts)
                    .await
            }
            Err(e) => Err(e),
        };

        if result.is_err() {
            self.abort_quietly(&session).await;
        }
        result
    }

    /// Send every part, returning the completed list sorted by part number
    async fn transfer_parts(
        &self,
        session: &MultipartSession,
        payload: &ObjectPayload,
        options: &TransferOptions,
    ) -> TransferResult<Vec<CompletedPart>> {
        if session.is_expired() {
            return Err(TransferError::TargetExpired {
                object_key: session.object_key.clone(),
            });
        }

        let slices = slice_parts(session, &payload.content)?;
        let tracker = ProgressTracker::new(payload.byte_length(), options.progress.clone());
        let concurrency = self.config.max_concurrent_parts.max(1);

        let mut parts: Vec<CompletedPart> = futures::stream::iter(slices)
            .map(|(part, body)| {
                self.transfer_part(part, body, &payload.content_type, &tracker, &options.cancel)
            })
            .buffer_unordered(concurrency)
            .try_collect()
            .await?;

        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn transfer_part(
        &self,
        part: &PartTarget,
        body: Bytes,
        content_type: &str,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> TransferResult<CompletedPart> {
        let mut backoff = self.config.part_backoff();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = self
                .put_bytes(
                    &part.write_url,
                    content_type,
                    body.clone(),
                    part.part_number,
                    tracker,
                    cancel,
                )
                .await;

            match result {
                Ok(integrity_tag) => {
                    return Ok(CompletedPart {
                        part_number: part.part_number,
                        integrity_tag,
                    })
                }
                Err(TransferError::Cancelled) => return Err(TransferError::Cancelled),
                Err(e) if e.is_retryable() && attempts <= self.config.part_max_retries => {
                    tracker.reset_part(part.part_number);
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| Duration::from_millis(self.config.retry_max_interval_ms));
                    tracing::warn!(
                        "Part {} failed (attempt {}), retrying in {:?}: {}",
                        part.part_number,
                        attempts,
                        delay,
                        e
                    );
                    record_part_retry(part.part_number);

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    return Err(TransferError::PartFailed {
                        part_number: part.part_number,
                        attempts,
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    async fn put_bytes(
        &self,
        url: &str,
        content_type: &str,
        body: Bytes,
        part_number: u32,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> TransferResult<String> {
        let on_progress = |sent: u64| tracker.update(part_number, sent);
        let send = async {
            self.limiter.wait_for_bytes(body.len()).await;
            self.transport.put(url, content_type, body, &on_progress).await
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = send => result,
        }
    }

    async fn abort_quietly(&self, session: &MultipartSession) {
        match self
            .backend
            .abort_multipart(&session.session_id, &session.object_key)
            .await
        {
            Ok(()) => {
                record_multipart_abort(true);
                tracing::info!("Aborted multipart session {}", session.session_id);
            }
            Err(e) => {
                record_multipart_abort(false);
                tracing::warn!(
                    "Failed to abort multipart session {}: {}",
                    session.session_id,
                    e
                );
            }
        }
    }

    /// Queue a deferrable call when offline, returning the queued request id
    async fn defer_if_offline(&self, call: DeferredStorageCall) -> TransferResult<Option<String>> {
        if self.is_online() {
            return Ok(None);
        }

        let Some(queue) = &self.queue else {
            return Err(TransferError::Offline);
        };
        let request = call.to_queued();
        queue.enqueue_request(&request).await?;
        Ok(Some(request.id))
    }

    pub async fn delete_object(&self, object_key: &str) -> TransferResult<()> {
        let call = DeferredStorageCall::Delete {
            object_key: object_key.to_string(),
        };
        if let Some(request_id) = self.defer_if_offline(call).await? {
            return Err(TransferError::OfflineQueued { request_id });
        }

        self.backend.delete_object(object_key).await
    }

    pub async fn copy_object(&self, source_key: &str, destination_key: &str) -> TransferResult<StoredObject> {
        let call = DeferredStorageCall::Copy(CopyRequest {
            source_key: source_key.to_string(),
            destination_key: destination_key.to_string(),
        });
        if let Some(request_id) = self.defer_if_offline(call).await? {
            return Err(TransferError::OfflineQueued { request_id });
        }

        self.backend.copy_object(source_key, destination_key).await
    }

    pub async fn object_metadata(&self, object_key: &str) -> TransferResult<ObjectMetadata> {
        if !self.is_online() {
            return Err(TransferError::Offline);
        }
        self.backend.object_metadata(object_key).await
    }

    pub async fn temporary_download_url(
        &self,
        object_key: &str,
        expires_in: Duration,
    ) -> TransferResult<DownloadUrl> {
        if !self.is_online() {
            return Err(TransferError::Offline);
        }
        self.backend
            .temporary_download_url(object_key, expires_in.as_secs().min(MAX_DOWNLOAD_URL_TTL_SECS))
            .await
    }
}

/// Contiguous content ranges for each part, in part-number order
fn slice_parts<'a>(
    session: &'a MultipartSession,
    content: &Bytes,
) -> TransferResult<Vec<(&'a PartTarget, Bytes)>> {
    let total = content.len() as u64;
    let covered = session.total_size().ok_or_else(|| {
        TransferError::InvalidSession(format!(
            "part sizes of session {} overflow",
            session.session_id
        ))
    })?;
    if session.parts.is_empty() || covered != total {
        return Err(TransferError::InvalidSession(format!(
            "parts cover {covered} of {total} bytes"
        )));
    }

    let mut ordered: Vec<&PartTarget> = session.parts.iter().collect();
    ordered.sort_by_key(|p| p.part_number);

    let mut offset = 0usize;
    let mut slices = Vec::with_capacity(ordered.len());
    for part in ordered {
        let end = offset + part.size as usize;
        slices.push((part, content.slice(offset..end)));
        offset = end;
    }
    Ok(slices)
}
