//! Sliding window limiter
//!
//! Keeps the admission timestamps of each key and allows at most
//! `max_requests` within any trailing `window`. Exact, with memory bounded by
//! `max_requests` timestamps per key.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{ceil_millis, RateLimitDecision, RateLimiter};

/// Read-only view of a sliding window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowStatus {
    pub count: usize,
    pub limit: usize,
    pub remaining: usize,
}

/// Keyed sliding window limiter
pub struct SlidingWindow {
    max_requests: usize,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindow {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn in_window(&self, timestamp: Instant, now: Instant) -> bool {
        now.saturating_duration_since(timestamp) < self.window
    }

    pub fn status_at(&self, key: &str, now: Instant) -> SlidingWindowStatus {
        let windows = self.windows.lock();
        let count = windows
            .get(key)
            .map(|timestamps| timestamps.iter().filter(|ts| self.in_window(**ts, now)).count())
            .unwrap_or(0);

        SlidingWindowStatus {
            count,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(count),
        }
    }

    pub fn status(&self, key: &str) -> SlidingWindowStatus {
        self.status_at(key, Instant::now())
    }
}

impl RateLimiter for SlidingWindow {
    fn check_at(&self, key: &str, cost: u32, now: Instant) -> RateLimitDecision {
        let cost = cost as usize;
        let mut windows = self.windows.lock();
        let timestamps = windows.entry(key.to_string()).or_default();

        while let Some(oldest) = timestamps.front() {
            if self.in_window(*oldest, now) {
                break;
            }
            timestamps.pop_front();
        }

        let count = timestamps.len();
        if count + cost > self.max_requests {
            let remaining = self.max_requests.saturating_sub(count) as f64;
            if cost > self.max_requests {
                return RateLimitDecision::deny(remaining, ceil_millis(self.window.as_secs_f64()));
            }

            // The entry whose expiry frees enough room for `cost` more
            let freeing = timestamps[count + cost - self.max_requests - 1];
            let wait = (freeing + self.window).saturating_duration_since(now);
            return RateLimitDecision::deny(remaining, ceil_millis(wait.as_secs_f64()));
        }

        timestamps.extend(std::iter::repeat(now).take(cost));
        RateLimitDecision::allow((self.max_requests - timestamps.len()) as f64)
    }

    fn cleanup_at(&self, max_age: Duration, now: Instant) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, timestamps| {
            timestamps
                .back()
                .map(|newest| now.saturating_duration_since(*newest) <= max_age)
                .unwrap_or(false)
        });
        before - windows.len()
    }

    fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}
