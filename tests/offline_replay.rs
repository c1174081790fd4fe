mod common;

use common::{png, Stack};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uploadkit::network::{NetworkState, NetworkTracker};
use uploadkit::orchestrator::{PipelineObserver, PipelineStage, ReplayRouter, RunOptions, StageError};
use uploadkit::queue::{OfflineQueue, SqliteRequestStore};
use uploadkit::transfer::StoredObject;
use uploadkit::{CandidateFile, EntityContext, WorkflowKind};

/// Drops connectivity the moment the bytes are stored
struct DisconnectAfterTransfer(Arc<NetworkTracker>);

impl PipelineObserver for DisconnectAfterTransfer {
    fn on_transfer_complete(&self, _file_name: &str, _stored: &StoredObject) {
        self.0.set_offline();
    }
}

async fn open_queue(dir: &TempDir, max_attempts: u32) -> Arc<OfflineQueue> {
    let store = SqliteRequestStore::open(&dir.path().join("queue.db")).await.unwrap();
    Arc::new(OfflineQueue::new(Arc::new(store), max_attempts))
}

async fn queue_one_confirmation(
    stack: &Stack,
    tracker: &Arc<NetworkTracker>,
    queue: &Arc<OfflineQueue>,
) -> String {
    let orchestrator = stack
        .orchestrator()
        .with_network(tracker.clone())
        .with_queue(queue.clone());
    let file = CandidateFile::new("receipt.png", "image/png", png(32, 32));
    let options =
        RunOptions::default().with_observer(Arc::new(DisconnectAfterTransfer(tracker.clone())));

    let err = orchestrator
        .run(WorkflowKind::Document, &EntityContext::for_contact("c-3"), &file, &options)
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::Confirming);
    match err.kind {
        StageError::OfflineQueued { request_id } => request_id,
        other => panic!("Expected queued confirmation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_confirmation_survives_restart_and_replays() {
    let dir = TempDir::new().unwrap();
    let stack = Stack::default();
    let tracker = Arc::new(NetworkTracker::new(NetworkState::Online));

    // 1. Go offline between transfer and confirmation
    let queue = open_queue(&dir, 5).await;
    let request_id = queue_one_confirmation(&stack, &tracker, &queue).await;
    assert_eq!(stack.storage.object_count(), 1);
    assert_eq!(stack.confirmations.confirmed_count(), 0);
    drop(queue);

    // 2. Reopen the same database
    let queue = open_queue(&dir, 5).await;
    let pending = queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, request_id);
    assert_eq!(pending[0].attempt_count, 0);
    assert_eq!(pending[0].target, "/attachments/register");

    // 3. Replay once back online
    tracker.set_online();
    let router = ReplayRouter::new(stack.storage.clone(), stack.confirmations.clone());
    let report = queue.drain(&router).await.unwrap();

    assert_eq!(report.replayed, vec![request_id]);
    assert!(report.is_clean());
    assert!(queue.is_empty().await.unwrap());

    let confirmed = stack.confirmations.confirmed();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].payload["context"]["contactId"], "c-3");
    assert_eq!(stack.storage.object_keys(), vec![confirmed[0].object_key.clone()]);
}

#[tokio::test]
async fn test_transient_failures_dropped_at_cap() {
    let dir = TempDir::new().unwrap();
    let stack = Stack::default();
    let tracker = Arc::new(NetworkTracker::new(NetworkState::Online));
    let queue = open_queue(&dir, 2).await;
    queue_one_confirmation(&stack, &tracker, &queue).await;

    let router = ReplayRouter::new(stack.storage.clone(), stack.confirmations.clone());
    stack.confirmations.reject_next(503, "maintenance");
    stack.confirmations.reject_next(503, "maintenance");

    let first = queue.drain(&router).await.unwrap();
    assert_eq!(first.requeued.len(), 1);
    assert_eq!(queue.pending().await.unwrap()[0].attempt_count, 1);

    let second = queue.drain(&router).await.unwrap();
    assert_eq!(second.dropped.len(), 1);
    assert!(queue.is_empty().await.unwrap());
    assert_eq!(stack.confirmations.confirmed_count(), 0);
}

#[tokio::test]
async fn test_reconnect_triggers_replay() {
    let dir = TempDir::new().unwrap();
    let stack = Stack::default();
    let tracker = Arc::new(NetworkTracker::new(NetworkState::Online));
    let queue = open_queue(&dir, 5).await;
    queue_one_confirmation(&stack, &tracker, &queue).await;
    assert!(!tracker.is_online());

    let cancel = CancellationToken::new();
    let router = Arc::new(ReplayRouter::new(stack.storage.clone(), stack.confirmations.clone()));
    let handle = queue.spawn_replay_on_reconnect(tracker.clone(), router, cancel.clone());

    tracker.set_online();
    tokio::time::timeout(Duration::from_secs(5), async {
        while stack.confirmations.confirmed_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(queue.is_empty().await.unwrap());
    cancel.cancel();
    handle.await.unwrap();
}
