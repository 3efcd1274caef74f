//! Upload rate limiting policy
//!
//! The limiter chain applied to every mutating upload endpoint:
//! 1. `global`: one token bucket shared by all callers
//! 2. `ip`: token bucket per originating address
//! 3. `user`: sliding window per caller identity
//!
//! Identity falls back to the origin address, then to `anonymous`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{
    MultiLevelDecision, MultiLevelLimiter, RateLimiter, RequestContext, SlidingWindow,
    SlidingWindowStatus, TokenBucket, TokenBucketStatus,
};
use crate::config::RateLimitConfig;

pub const GLOBAL_KEY: &str = "global";
pub const UNKNOWN_ORIGIN: &str = "unknown";
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Diagnostic snapshot served by the rate-limit-status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub global: TokenBucketStatus,
    pub ip: TokenBucketStatus,
    pub user: SlidingWindowStatus,
}

/// Key for the per-origin layer
pub fn origin_key(context: &RequestContext) -> String {
    non_empty(&context.origin).unwrap_or_else(|| UNKNOWN_ORIGIN.to_string())
}

/// Key for the per-identity layer
pub fn identity_key(context: &RequestContext) -> String {
    non_empty(&context.identity)
        .or_else(|| non_empty(&context.origin))
        .unwrap_or_else(|| ANONYMOUS_IDENTITY.to_string())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Rate limiter for upload endpoints
pub struct UploadRateLimiter {
    global: Arc<TokenBucket>,
    per_origin: Arc<TokenBucket>,
    per_identity: Arc<SlidingWindow>,
    chain: MultiLevelLimiter,
}

impl UploadRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let global = Arc::new(TokenBucket::new(config.global_capacity, config.global_refill_per_sec));
        let per_origin = Arc::new(TokenBucket::new(config.ip_capacity, config.ip_refill_per_sec));
        let per_identity = Arc::new(SlidingWindow::new(config.user_max_requests, config.user_window()));

        let chain = MultiLevelLimiter::new()
            .with_layer("global", global.clone(), |_| GLOBAL_KEY.to_string(), 1)
            .with_layer("ip", per_origin.clone(), origin_key, 1)
            .with_layer("user", per_identity.clone(), identity_key, 1);

        Self {
            global,
            per_origin,
            per_identity,
            chain,
        }
    }

    pub fn check(&self, context: &RequestContext) -> MultiLevelDecision {
        self.chain.check(context)
    }

    pub fn check_at(&self, context: &RequestContext, now: Instant) -> MultiLevelDecision {
        self.chain.check_at(context, now)
    }

    /// Read-only view of the three layers as seen by `context`
    pub fn status(&self, context: &RequestContext) -> RateLimitStatus {
        let now = Instant::now();
        RateLimitStatus {
            global: self.global.status_at(GLOBAL_KEY, now),
            ip: self.per_origin.status_at(&origin_key(context), now),
            user: self.per_identity.status_at(&identity_key(context), now),
        }
    }

    /// Evict keys idle for longer than `max_age` from every layer
    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.global.cleanup(max_age) + self.per_origin.cleanup(max_age) + self.per_identity.cleanup(max_age)
    }

    pub fn tracked_keys(&self) -> usize {
        self.global.tracked_keys() + self.per_origin.tracked_keys() + self.per_identity.tracked_keys()
    }

    /// Start background cleanup task
    pub fn start_cleanup_task(
        self: Arc<Self>,
        every: Duration,
        max_age: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let removed = self.cleanup(max_age);
                if removed > 0 {
                    tracing::info!(
                        removed = removed,
                        remaining = self.tracked_keys(),
                        "Evicted idle rate limiter keys"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(origin: Option<&str>, identity: Option<&str>) -> RequestContext {
        RequestContext::new(origin.map(String::from), identity.map(String::from))
    }

    #[test]
    fn test_key_fallbacks() {
        assert_eq!(origin_key(&context(None, None)), "unknown");
        assert_eq!(origin_key(&context(Some("1.2.3.4"), None)), "1.2.3.4");
        assert_eq!(identity_key(&context(Some("1.2.3.4"), Some("alice"))), "alice");
        assert_eq!(identity_key(&context(Some("1.2.3.4"), None)), "1.2.3.4");
        assert_eq!(identity_key(&context(None, None)), "anonymous");
        assert_eq!(identity_key(&context(None, Some("  "))), "anonymous");
    }

    #[test]
    fn test_per_origin_layer_blocks() {
        let config = RateLimitConfig {
            ip_capacity: 2.0,
            ip_refill_per_sec: 1.0,
            ..RateLimitConfig::default()
        };
        let limiter = UploadRateLimiter::new(&config);
        let now = Instant::now();
        let caller = context(Some("10.0.0.7"), None);

        assert!(limiter.check_at(&caller, now).allowed);
        assert!(limiter.check_at(&caller, now).allowed);

        let denied = limiter.check_at(&caller, now);
        assert!(!denied.allowed);
        assert_eq!(denied.blocked_by.as_deref(), Some("ip"));
        assert_eq!(denied.retry_after_ms, 1000);

        // Another origin still has its own bucket
        assert!(limiter.check_at(&context(Some("10.0.0.8"), None), now).allowed);
    }

    #[test]
    fn test_per_identity_window_blocks() {
        let config = RateLimitConfig {
            user_max_requests: 1,
            ..RateLimitConfig::default()
        };
        let limiter = UploadRateLimiter::new(&config);
        let now = Instant::now();

        assert!(limiter.check_at(&context(Some("a"), Some("bob")), now).allowed);
        let denied = limiter.check_at(&context(Some("b"), Some("bob")), now);
        assert_eq!(denied.blocked_by.as_deref(), Some("user"));
        assert_eq!(denied.retry_after_ms, 60_000);
    }

    #[test]
    fn test_status_reflects_consumption() {
        let limiter = UploadRateLimiter::new(&RateLimitConfig::default());
        let caller = context(Some("10.1.1.1"), Some("carol"));

        limiter.check(&caller);
        let status = limiter.status(&caller);

        assert_eq!(status.global.capacity, 1000.0);
        assert!(status.ip.tokens < 20.0);
        assert_eq!(status.user.count, 1);
        assert_eq!(status.user.limit, 100);
        assert_eq!(status.user.remaining, 99);
    }

    #[test]
    fn test_cleanup_sweeps_all_layers() {
        let limiter = UploadRateLimiter::new(&RateLimitConfig::default());
        limiter.check(&context(Some("x"), Some("y")));
        assert_eq!(limiter.tracked_keys(), 3);
        assert_eq!(limiter.cleanup(Duration::from_secs(60)), 0);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(limiter.cleanup(Duration::ZERO), 3);
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
