//! TOML-loadable configuration for the pipeline collaborators

use crate::network::{HttpProbe, NetworkState, NetworkTracker};
use crate::orchestrator::WorkflowRegistry;
use crate::queue::replay::DEFAULT_MAX_ATTEMPTS;
use crate::queue::{MemoryRequestStore, OfflineQueue, QueueResult, RequestStore, SqliteRequestStore};
use crate::transfer::TransferConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// SQLite URL; requests are kept in memory when unset
    pub database_url: Option<String>,
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl QueueConfig {
    pub async fn open(&self) -> QueueResult<OfflineQueue> {
        let store: Arc<dyn RequestStore> = match &self.database_url {
            Some(url) => Arc::new(SqliteRequestStore::new(url).await?),
            None => Arc::new(MemoryRequestStore::new()),
        };
        Ok(OfflineQueue::new(store, self.max_attempts))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub initial_online: bool,
    /// Endpoint polled by the connectivity probe, if any
    pub probe_url: Option<String>,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            initial_online: true,
            probe_url: None,
            probe_interval_ms: 15_000,
            probe_timeout_ms: 3_000,
        }
    }
}

impl NetworkConfig {
    pub fn tracker(&self) -> NetworkTracker {
        NetworkTracker::new(if self.initial_online {
            NetworkState::Online
        } else {
            NetworkState::Offline
        })
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Start polling `probe_url`; does nothing when no URL is configured
    pub fn start_probe(
        &self,
        tracker: &Arc<NetworkTracker>,
        cancel: CancellationToken,
    ) -> Result<Option<JoinHandle<()>>, ConfigError> {
        let Some(url) = &self.probe_url else {
            return Ok(None);
        };
        let probe = HttpProbe::new(url.clone(), self.probe_timeout())
            .map_err(|e| ConfigError::Invalid(format!("network.probe_url: {e}")))?;
        Ok(Some(tracker.spawn_probe(Arc::new(probe), self.probe_interval(), cancel)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub transfer: TransferConfig,
    pub queue: QueueConfig,
    pub network: NetworkConfig,
    pub workflows: WorkflowRegistry,
}

impl UploadConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&text)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.transfer.part_size_bytes == 0 {
            return Err(ConfigError::Invalid("transfer.part_size_bytes must be non-zero".into()));
        }
        if self.transfer.max_concurrent_parts == 0 {
            return Err(ConfigError::Invalid(
                "transfer.max_concurrent_parts must be non-zero".into(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(ConfigError::Invalid("queue.max_attempts must be non-zero".into()));
        }
        for (name, profile) in [
            ("avatar", &self.workflows.avatar),
            ("document", &self.workflows.document),
            ("tabular-import", &self.workflows.tabular_import),
        ] {
            if let Some(transform) = &profile.transform {
                transform
                    .validate()
                    .map_err(|e| ConfigError::Invalid(format!("workflows.{name}.transform: {e}")))?;
            }
        }
        Ok(())
    }
}
