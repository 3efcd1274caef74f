//! Rate Limiting
//!
//! Independent admission-control primitives plus an ordered composition:
//! - `TokenBucket`: burst tolerant, refills continuously up to capacity
//! - `LeakyBucket`: smoothing, drains a queue depth at a fixed rate
//! - `SlidingWindow`: exact request count over a trailing window
//! - `MultiLevelLimiter`: ordered layers, first denial wins
//!
//! Every limiter owns its per-key state. Keys are created lazily on first
//! check and only removed by `cleanup`.

pub mod leaky_bucket;
pub mod multi_level;
pub mod policy;
pub mod sliding_window;
pub mod token_bucket;

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

pub use leaky_bucket::{LeakyBucket, LeakyBucketStatus};
pub use multi_level::{LayerResult, MultiLevelDecision, MultiLevelLimiter, RequestContext};
pub use policy::{RateLimitStatus, UploadRateLimiter};
pub use sliding_window::{SlidingWindow, SlidingWindowStatus};
pub use token_bucket::{TokenBucket, TokenBucketStatus};

/// Outcome of a single limiter check
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether the request was admitted
    pub allowed: bool,

    /// Capacity left after this check (tokens, free queue slots or requests)
    pub remaining: f64,

    /// Milliseconds until a retry can succeed, 0 when allowed
    pub retry_after_ms: u64,
}

impl RateLimitDecision {
    pub fn allow(remaining: f64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after_ms: 0,
        }
    }

    pub fn deny(remaining: f64, retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            remaining,
            retry_after_ms,
        }
    }

    /// Retry delay as a `Duration`
    pub fn retry_after(&self) -> Duration {
        Duration::from_millis(self.retry_after_ms)
    }
}

/// Common interface for keyed admission-control algorithms
///
/// `check_at` must apply its read-modify-write on a key atomically with
/// respect to other checks of the same key.
pub trait RateLimiter: Send + Sync {
    /// Check and, if admitted, consume `cost` units for `key` at `now`
    fn check_at(&self, key: &str, cost: u32, now: Instant) -> RateLimitDecision;

    /// Evict keys idle for longer than `max_age`, returning how many were removed
    fn cleanup_at(&self, max_age: Duration, now: Instant) -> usize;

    /// Number of keys currently tracked
    fn tracked_keys(&self) -> usize;

    fn check(&self, key: &str, cost: u32) -> RateLimitDecision {
        self.check_at(key, cost, Instant::now())
    }

    fn cleanup(&self, max_age: Duration) -> usize {
        self.cleanup_at(max_age, Instant::now())
    }
}

/// Convert a wait in seconds to whole milliseconds, rounding up
pub(crate) fn ceil_millis(seconds: f64) -> u64 {
    let millis = (seconds * 1000.0).ceil();
    if millis.is_finite() && millis > 0.0 {
        millis as u64
    } else if millis.is_finite() {
        0
    } else {
        u64::MAX
    }
}
