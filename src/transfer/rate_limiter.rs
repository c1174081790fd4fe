//! Bandwidth limiting for byte transfers using the governor crate

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Limiter granularity; one permit per KiB sent
const UNIT_BYTES: usize = 1024;

/// Caps the bytes per second sent across every transfer sharing it
#[derive(Clone, Default)]
pub struct BandwidthLimiter {
    limiter: Option<Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
}

impl BandwidthLimiter {
    /// `bytes_per_second` of 0 means unlimited
    pub fn new(bytes_per_second: u64) -> Self {
        if bytes_per_second == 0 {
            return Self::unlimited();
        }

        let units = u32::try_from((bytes_per_second / UNIT_BYTES as u64).max(1)).unwrap_or(u32::MAX);
        let quota = Quota::per_second(NonZeroU32::new(units).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: Some(Arc::new(RateLimiter::direct(quota))),
        }
    }

    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// Wait until `bytes` may be sent
    pub async fn wait_for_bytes(&self, bytes: usize) {
        let Some(limiter) = &self.limiter else {
            return;
        };

        let units = bytes.div_ceil(UNIT_BYTES).max(1);
        for _ in 0..units {
            limiter.until_ready().await;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }
}

impl std::fmt::Debug for BandwidthLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BandwidthLimiter")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
