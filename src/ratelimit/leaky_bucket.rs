//! Leaky bucket limiter
//!
//! Each key tracks a queue depth (`water`) that drains at `leak_rate` units
//! per second. Requests add to the depth and are refused once the bucket is
//! full, which smooths traffic instead of allowing bursts.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{ceil_millis, RateLimitDecision, RateLimiter};

#[derive(Debug, Clone, Copy)]
struct Bucket {
    water: f64,
    last_leak: Instant,
}

/// Read-only view of a leaky bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeakyBucketStatus {
    pub water: f64,
    pub capacity: f64,
}

/// Keyed leaky bucket limiter
pub struct LeakyBucket {
    capacity: f64,
    leak_rate: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl LeakyBucket {
    pub fn new(capacity: f64, leak_rate: f64) -> Self {
        Self {
            capacity,
            leak_rate,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn leaked(&self, bucket: &Bucket, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(bucket.last_leak).as_secs_f64();
        (bucket.water - elapsed * self.leak_rate).max(0.0)
    }

    pub fn status_at(&self, key: &str, now: Instant) -> LeakyBucketStatus {
        let buckets = self.buckets.lock();
        let water = buckets
            .get(key)
            .map(|bucket| self.leaked(bucket, now))
            .unwrap_or(0.0);

        LeakyBucketStatus {
            water,
            capacity: self.capacity,
        }
    }

    pub fn status(&self, key: &str) -> LeakyBucketStatus {
        self.status_at(key, Instant::now())
    }
}

impl RateLimiter for LeakyBucket {
    fn check_at(&self, key: &str, cost: u32, now: Instant) -> RateLimitDecision {
        let cost = f64::from(cost);
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            water: 0.0,
            last_leak: now,
        });

        bucket.water = self.leaked(bucket, now);
        bucket.last_leak = bucket.last_leak.max(now);

        // With cost 1 this is `water >= capacity`
        let overflow = bucket.water + cost - self.capacity;
        if overflow >= 1.0 {
            let remaining = (self.capacity - bucket.water).max(0.0);
            return RateLimitDecision::deny(remaining, ceil_millis(overflow / self.leak_rate));
        }

        bucket.water += cost;
        RateLimitDecision::allow((self.capacity - bucket.water).max(0.0))
    }

    fn cleanup_at(&self, max_age: Duration, now: Instant) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_leak) <= max_age);
        before - buckets.len()
    }

    fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_to_capacity_then_denies() {
        let bucket = LeakyBucket::new(3.0, 1.0);
        let now = Instant::now();

        assert_eq!(bucket.check_at("k", 1, now).remaining, 2.0);
        assert_eq!(bucket.check_at("k", 1, now).remaining, 1.0);
        assert_eq!(bucket.check_at("k", 1, now).remaining, 0.0);

        let denied = bucket.check_at("k", 1, now);
        assert!(!denied.allowed);
        // (water - capacity + 1) / leak_rate seconds
        assert_eq!(denied.retry_after_ms, 1000);
    }

    #[test]
    fn test_leak_frees_space() {
        let bucket = LeakyBucket::new(2.0, 4.0);
        let start = Instant::now();

        assert!(bucket.check_at("k", 1, start).allowed);
        assert!(bucket.check_at("k", 1, start).allowed);
        let denied = bucket.check_at("k", 1, start);
        assert_eq!(denied.retry_after_ms, 250);

        let later = start + Duration::from_millis(250);
        assert!(bucket.check_at("k", 1, later).allowed);
        assert!(!bucket.check_at("k", 1, later).allowed);
    }

    #[test]
    fn test_water_never_negative() {
        let bucket = LeakyBucket::new(5.0, 10.0);
        let start = Instant::now();

        bucket.check_at("k", 1, start);
        let status = bucket.status_at("k", start + Duration::from_secs(30));
        assert_eq!(status.water, 0.0);
        assert_eq!(bucket.status_at("unseen", start).water, 0.0);
    }

    #[test]
    fn test_cleanup() {
        let bucket = LeakyBucket::new(5.0, 1.0);
        let start = Instant::now();

        bucket.check_at("a", 1, start);
        bucket.check_at("b", 1, start);
        assert_eq!(bucket.cleanup_at(Duration::from_secs(10), start + Duration::from_secs(5)), 0);
        assert_eq!(bucket.cleanup_at(Duration::from_secs(10), start + Duration::from_secs(11)), 2);
        assert_eq!(bucket.tracked_keys(), 0);
    }
}
