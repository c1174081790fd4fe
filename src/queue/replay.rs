use crate::network::NetworkTracker;
use crate::queue::error::{QueueResult, ReplayError};
use crate::queue::store::RequestStore;
use crate::queue::types::{DrainReport, QueuedRequest, RequestMethod};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default attempt cap before a queued request is dropped
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Sends a previously queued request to the backend
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: &QueuedRequest) -> Result<serde_json::Value, ReplayError>;
}

/// Offline request queue with a single-writer discipline.
///
/// Every enqueue and drain goes through `writer`, so two drains can never
/// interleave and replay the same request twice.
pub struct OfflineQueue {
    store: Arc<dyn RequestStore>,
    max_attempts: u32,
    writer: Mutex<()>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn RequestStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            writer: Mutex::new(()),
        }
    }

    pub fn with_default_attempts(store: Arc<dyn RequestStore>) -> Self {
        Self::new(store, DEFAULT_MAX_ATTEMPTS)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Capture a request for later replay
    pub async fn enqueue(
        &self,
        method: RequestMethod,
        target: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> QueueResult<QueuedRequest> {
        let request = QueuedRequest::new(method, target, payload);
        self.enqueue_request(&request).await?;
        Ok(request)
    }

    pub async fn enqueue_request(&self, request: &QueuedRequest) -> QueueResult<()> {
        let _guard = self.writer.lock().await;
        self.store.append(request).await?;

        tracing::info!(
            "Queued {} {} for replay (id {})",
            request.method.as_str(),
            request.target,
            request.id
        );
        crate::metrics::recorder::record_request_queued(self.store.len().await?);
        Ok(())
    }

    pub async fn pending(&self) -> QueueResult<Vec<QueuedRequest>> {
        self.store.peek_all().await
    }

    pub async fn len(&self) -> QueueResult<usize> {
        self.store.len().await
    }

    pub async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.store.len().await? == 0)
    }

    /// Replay every pending request once, oldest first.
    ///
    /// Successes are removed. Transient failures go to the back of the queue
    /// with `attempt_count + 1` until the cap is reached, then are dropped;
    /// permanent failures are dropped immediately.
    pub async fn drain(&self, executor: &dyn RequestExecutor) -> QueueResult<DrainReport> {
        let _guard = self.writer.lock().await;
        let mut report = DrainReport::default();

        let pending = self.store.peek_all().await?;
        if pending.is_empty() {
            return Ok(report);
        }

        tracing::info!("Draining {} queued request(s)", pending.len());

        for request in pending {
            match executor.execute(&request).await {
                Ok(_) => {
                    self.store.remove(&request.id).await?;
                    tracing::debug!("Replayed {} {}", request.method.as_str(), request.target);
                    report.replayed.push(request.id);
                }
                Err(ReplayError::Permanent(reason)) => {
                    self.store.remove(&request.id).await?;
                    tracing::error!(
                        "Dropping queued request {} ({} {}): {}",
                        request.id,
                        request.method.as_str(),
                        request.target,
                        reason
                    );
                    report.dropped.push(request.id);
                }
                Err(ReplayError::Transient(reason)) => {
                    let next = request.next_attempt();
                    if next.attempt_count >= self.max_attempts {
                        self.store.remove(&request.id).await?;
                        tracing::error!(
                            "Dropping queued request {} after {} attempts: {}",
                            request.id,
                            next.attempt_count,
                            reason
                        );
                        report.dropped.push(request.id);
                    } else {
                        self.store.requeue(&next).await?;
                        tracing::warn!(
                            "Replay of {} failed (attempt {}/{}): {}",
                            request.id,
                            next.attempt_count,
                            self.max_attempts,
                            reason
                        );
                        report.requeued.push(request.id);
                    }
                }
            }
        }

        crate::metrics::recorder::record_queue_drain(&report, self.store.len().await?);
        Ok(report)
    }

    /// Drain the queue every time the tracker transitions back online.
    ///
    /// Requests left by a previous process are replayed straight away when
    /// the tracker is already online at spawn.
    pub fn spawn_replay_on_reconnect(
        self: &Arc<Self>,
        tracker: Arc<NetworkTracker>,
        executor: Arc<dyn RequestExecutor>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let mut state_rx = tracker.subscribe();
        let mut was_online = state_rx.borrow_and_update().is_online();

        tokio::spawn(async move {
            if was_online {
                if let Err(e) = queue.drain(executor.as_ref()).await {
                    tracing::error!("Startup replay failed: {}", e);
                }
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = state_rx.borrow_and_update().is_online();
                        if online && !was_online {
                            if let Err(e) = queue.drain(executor.as_ref()).await {
                                tracing::error!("Replay after reconnect failed: {}", e);
                            }
                        }
                        was_online = online;
                    }
                }
            }

            tracing::debug!(
                "Reconnect replay stopped while {}",
                tracker.current().as_str()
            );
        })
    }
}
