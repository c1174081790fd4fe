use crate::transfer::types::{ProgressCallback, TransferProgress};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

/// Sums bytes sent across the parts of one transfer and reports progress
pub struct ProgressTracker {
    total_bytes: u64,
    started: Instant,
    parts: Mutex<HashMap<u32, u64>>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, callback: Option<ProgressCallback>) -> Self {
        Self {
            total_bytes,
            started: Instant::now(),
            parts: Mutex::new(HashMap::new()),
            callback,
        }
    }

    /// Record the cumulative bytes sent for one part
    pub fn update(&self, part_number: u32, sent: u64) {
        let uploaded = {
            let mut parts = self.parts.lock();
            parts.insert(part_number, sent);
            parts.values().sum::<u64>()
        };
        self.emit(uploaded);
    }

    /// Forget the bytes of a part that is about to be retried
    pub fn reset_part(&self, part_number: u32) {
        let uploaded = {
            let mut parts = self.parts.lock();
            parts.remove(&part_number);
            parts.values().sum::<u64>()
        };
        self.emit(uploaded);
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.parts.lock().values().sum()
    }

    pub fn snapshot(&self) -> TransferProgress {
        self.progress_for(self.uploaded_bytes())
    }

    fn progress_for(&self, uploaded: u64) -> TransferProgress {
        let uploaded = uploaded.min(self.total_bytes);
        let elapsed = self.started.elapsed().as_secs_f64();
        let bytes_per_second = if elapsed > 0.0 {
            uploaded as f64 / elapsed
        } else {
            0.0
        };
        let percentage = if self.total_bytes == 0 {
            100.0
        } else {
            (uploaded as f64 / self.total_bytes as f64 * 100.0) as f32
        };
        let estimated_seconds_remaining = (bytes_per_second > 0.0)
            .then(|| (self.total_bytes - uploaded) as f64 / bytes_per_second);

        TransferProgress {
            uploaded_bytes: uploaded,
            total_bytes: self.total_bytes,
            percentage,
            bytes_per_second,
            estimated_seconds_remaining,
        }
    }

    fn emit(&self, uploaded: u64) {
        if let Some(callback) = &self.callback {
            callback(self.progress_for(uploaded));
        }
    }
}
