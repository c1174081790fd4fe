//! Prometheus text rendering for the pipeline metrics
//!
//! The crate serves no endpoint of its own; callers mount [`render_metrics`]
//! wherever their scrape target lives.

use crate::metrics::recorder::init_metrics;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Prometheus recorder could not be installed: {0}")]
    Install(String),
}

/// Install a Prometheus recorder process-wide, or return the one already in place
pub fn install_prometheus_recorder() -> Result<&'static PrometheusHandle, MetricsError> {
    if let Some(existing) = HANDLE.get() {
        return Ok(existing);
    }

    let installed = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    let handle = HANDLE.get_or_init(|| installed);

    // Descriptions registered before installation are lost
    init_metrics();
    Ok(handle)
}

/// Current metrics in the Prometheus exposition format; `None` before installation
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(PrometheusHandle::render)
}
