//! Metrics and observability module
//!
//! Records pipeline metrics through the `metrics` facade. Nothing is
//! exported unless the embedding application installs a recorder, for
//! example with [`install_prometheus_recorder`].
//!
//! Key metrics exposed:
//! - Validation outcomes per workflow
//! - Transfer throughput, retries and aborts
//! - Offline queue depth, replays and drops
//! - Workflow durations and failures by stage

pub mod exporter;
pub mod recorder;

pub use exporter::{install_prometheus_recorder, render_metrics, MetricsError};
pub use recorder::{init_metrics, TransferTimer};
