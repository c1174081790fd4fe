use crate::network::probe::ConnectivityProbe;
use crate::network::types::{ConnectivityChange, NetworkState};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Observes connectivity and fans state changes out to subscribers.
///
/// The tracker is the single source of truth for "are we online"; the
/// transfer client and orchestrator read it at call time, the request queue
/// subscribes to it to replay on reconnect.
pub struct NetworkTracker {
    state_tx: watch::Sender<NetworkState>,
    last_change: RwLock<Option<ConnectivityChange>>,
    transitions: AtomicU64,
}

impl Default for NetworkTracker {
    fn default() -> Self {
        Self::new(NetworkState::Online)
    }
}

impl NetworkTracker {
    pub fn new(initial: NetworkState) -> Self {
        let (state_tx, _) = watch::channel(initial);
        Self {
            state_tx,
            last_change: RwLock::new(None),
            transitions: AtomicU64::new(0),
        }
    }

    /// Get current state
    pub fn current(&self) -> NetworkState {
        *self.state_tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Record a new state, returning the transition if it changed anything
    pub fn set_state(&self, state: NetworkState) -> Option<ConnectivityChange> {
        let mut previous = state;
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            previous = *current;
            *current = state;
            true
        });

        if !changed {
            return None;
        }

        let change = ConnectivityChange {
            previous,
            current: state,
            changed_at: chrono::Utc::now().timestamp_millis(),
        };
        *self.last_change.write() = Some(change);
        self.transitions.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            "Connectivity changed: {} -> {}",
            previous.as_str(),
            state.as_str()
        );
        Some(change)
    }

    pub fn set_online(&self) -> Option<ConnectivityChange> {
        self.set_state(NetworkState::Online)
    }

    pub fn set_offline(&self) -> Option<ConnectivityChange> {
        self.set_state(NetworkState::Offline)
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.state_tx.subscribe()
    }

    /// Most recent transition, if any happened since creation
    pub fn last_change(&self) -> Option<ConnectivityChange> {
        *self.last_change.read()
    }

    /// Number of state transitions observed
    pub fn transition_count(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    /// Wait until the tracker reports online
    pub async fn wait_until_online(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|state| state.is_online()).await;
    }

    /// Poll a connectivity probe periodically and feed the result into the tracker
    pub fn spawn_probe(
        self: &Arc<Self>,
        probe: Arc<dyn ConnectivityProbe>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let online = probe.check().await;
                        tracker.set_state(NetworkState::from(online));
                    }
                }
            }

            tracing::debug!("Connectivity probe stopped");
        })
    }
}
