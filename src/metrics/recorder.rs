//! Metrics recorder for upload pipeline operations
//!
//! Records validation, transform, transfer, queue and workflow outcomes.

use crate::queue::DrainReport;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    // Validation
    describe_counter!(
        "upload_validations_total",
        "Files validated, labelled by workflow and outcome"
    );
    describe_counter!(
        "upload_validation_errors_total",
        "Validation errors raised across all files"
    );

    // Transform
    describe_histogram!(
        "upload_transform_duration_seconds",
        "Time spent decoding, rendering and encoding an image"
    );
    describe_histogram!(
        "upload_compression_ratio",
        "Original byte length divided by output byte length"
    );

    // Transfer counters
    describe_counter!("upload_bytes_sent_total", "Total bytes sent to object storage");
    describe_counter!(
        "upload_transfers_started_total",
        "Object transfers begun, labelled by strategy"
    );
    describe_counter!(
        "upload_transfers_completed_total",
        "Object transfers confirmed by storage"
    );
    describe_counter!(
        "upload_transfers_failed_total",
        "Object transfers abandoned, labelled by strategy and reason"
    );
    describe_counter!("upload_part_retries_total", "Multipart part retries");
    describe_counter!(
        "upload_multipart_aborts_total",
        "Multipart sessions aborted, labelled by whether the abort succeeded"
    );

    // Gauges
    describe_gauge!("upload_active_transfers", "Transfers currently in flight");
    describe_gauge!(
        "upload_offline_queue_depth",
        "Requests waiting in the offline queue"
    );

    // Histograms
    describe_histogram!(
        "upload_transfer_size_bytes",
        "Payload size at the start of each transfer"
    );
    describe_histogram!(
        "upload_transfer_duration_seconds",
        "Wall time from write target request to storage confirmation"
    );
    describe_histogram!(
        "upload_throughput_bytes_per_second",
        "Stored bytes divided by transfer wall time"
    );
    describe_histogram!(
        "upload_workflow_duration_seconds",
        "End-to-end workflow duration"
    );
}

// ============== Validation ==============

/// Record a validation outcome
pub fn record_validation(workflow: &str, accepted: bool, error_count: usize) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    counter!("upload_validations_total", "workflow" => workflow.to_string(), "outcome" => outcome)
        .increment(1);
    counter!("upload_validation_errors_total").increment(error_count as u64);
}

// ============== Transform ==============

/// Record a completed image transform
pub fn record_transform(duration: Duration, compression_ratio: f64) {
    histogram!("upload_transform_duration_seconds").record(duration.as_secs_f64());
    if compression_ratio.is_finite() {
        histogram!("upload_compression_ratio").record(compression_ratio);
    }
}

// ============== Transfer Operations ==============

/// Record a transfer starting
pub fn record_transfer_started(strategy: &str, file_size: u64) {
    counter!("upload_transfers_started_total", "strategy" => strategy.to_string()).increment(1);
    gauge!("upload_active_transfers").increment(1.0);
    histogram!("upload_transfer_size_bytes").record(file_size as f64);
}

/// Record a transfer completing successfully
pub fn record_transfer_complete(strategy: &str, duration: Duration, stored_bytes: u64) {
    counter!("upload_transfers_completed_total", "strategy" => strategy.to_string()).increment(1);
    counter!("upload_bytes_sent_total").increment(stored_bytes);
    gauge!("upload_active_transfers").decrement(1.0);

    histogram!("upload_transfer_duration_seconds").record(duration.as_secs_f64());

    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        histogram!("upload_throughput_bytes_per_second").record(stored_bytes as f64 / secs);
    }
}

/// Record a transfer failing
pub fn record_transfer_failed(strategy: &str, reason: &str) {
    counter!("upload_transfers_failed_total", "strategy" => strategy.to_string(), "reason" => reason.to_string()).increment(1);
    gauge!("upload_active_transfers").decrement(1.0);
}

pub fn record_part_retry(part_number: u32) {
    counter!("upload_part_retries_total", "part" => part_number.to_string()).increment(1);
}

pub fn record_multipart_abort(succeeded: bool) {
    let outcome = if succeeded { "ok" } else { "failed" };
    counter!("upload_multipart_aborts_total", "outcome" => outcome).increment(1);
}

// ============== Queue Metrics ==============

pub fn record_request_queued(depth: usize) {
    counter!("upload_requests_queued_total").increment(1);
    gauge!("upload_offline_queue_depth").set(depth as f64);
}

pub fn record_queue_drain(report: &DrainReport, depth: usize) {
    counter!("upload_requests_replayed_total").increment(report.replayed.len() as u64);
    counter!("upload_requests_dropped_total").increment(report.dropped.len() as u64);
    gauge!("upload_offline_queue_depth").set(depth as f64);
}

// ============== Workflow Metrics ==============

pub fn record_workflow_complete(workflow: &str, duration: Duration) {
    counter!("upload_workflows_completed_total", "workflow" => workflow.to_string()).increment(1);
    histogram!("upload_workflow_duration_seconds", "workflow" => workflow.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_workflow_failed(workflow: &str, stage: &str) {
    counter!("upload_workflows_failed_total", "workflow" => workflow.to_string(), "stage" => stage.to_string()).increment(1);
}

/// Times one transfer; dropping it without `finish` or `fail` still
/// releases the active-transfer gauge.
pub struct TransferTimer {
    strategy: &'static str,
    began: Instant,
    settled: bool,
}

impl TransferTimer {
    pub fn start(strategy: &'static str, byte_length: u64) -> Self {
        record_transfer_started(strategy, byte_length);
        Self {
            strategy,
            began: Instant::now(),
            settled: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.began.elapsed()
    }

    pub fn finish(mut self, stored_bytes: u64) {
        self.settled = true;
        record_transfer_complete(self.strategy, self.began.elapsed(), stored_bytes);
    }

    pub fn fail(mut self, reason: &str) {
        self.settled = true;
        record_transfer_failed(self.strategy, reason);
    }
}

impl Drop for TransferTimer {
    fn drop(&mut self) {
        if !self.settled {
            record_transfer_failed(self.strategy, "abandoned");
        }
    }
}
