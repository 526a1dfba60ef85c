//! Token bucket rate limiter.
//!
//! Tokens refill continuously at `refill_per_minute / 60` per second up to
//! `capacity`. [`RateLimiter::acquire`] never fails; it only waits.

use crate::config::RateLimitConfig;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Lowest accepted refill rate, one token per minute.
const MIN_REFILL_PER_SEC: f64 = 1.0 / 60.0;

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Debit one token, or report how long until one is available.
    fn try_take(&mut self) -> Option<Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// Point-in-time view of the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterUsage {
    pub current_tokens: f64,
    pub capacity: u32,
    pub refill_per_minute: f64,
    /// Tokens handed out since creation or the last `reset`.
    pub total_requests: u64,
}

/// Shared token bucket for one remote dependency.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    capacity: u32,
    requests: AtomicU64,
}

impl RateLimiter {
    /// Create a full bucket.
    #[must_use]
    pub fn new(capacity: u32, refill_per_minute: f64) -> Self {
        let capacity = capacity.max(1);
        let refill_per_sec = (refill_per_minute / 60.0).max(MIN_REFILL_PER_SEC);
        Self {
            bucket: Mutex::new(TokenBucket::new(f64::from(capacity), refill_per_sec)),
            capacity,
            requests: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.effective_refill_per_minute())
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = self
                .bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_take();
            match wait {
                None => {
                    self.requests.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Some(delay) => {
                    tracing::debug!(wait_ms = delay.as_millis(), "rate limiter waiting for token");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Take a token only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let taken = self
            .bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_take()
            .is_none();
        if taken {
            self.requests.fetch_add(1, Ordering::Relaxed);
        }
        taken
    }

    #[must_use]
    pub fn get_usage(&self) -> RateLimiterUsage {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill();
        RateLimiterUsage {
            current_tokens: bucket.tokens,
            capacity: self.capacity,
            refill_per_minute: bucket.refill_per_sec * 60.0,
            total_requests: self.requests.load(Ordering::Relaxed),
        }
    }

    /// Refill the bucket and zero the request counter.
    pub fn reset(&self) {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.tokens = bucket.capacity;
        bucket.last_refill = Instant::now();
        self.requests.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_wait_for_refill() {
        // 60/min = one token per second
        let limiter = RateLimiter::new(2, 60.0);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(limiter.get_usage().total_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_never_exceed_capacity() {
        let limiter = RateLimiter::new(3, 600.0);
        tokio::time::advance(Duration::from_secs(120)).await;
        let usage = limiter.get_usage();
        assert!(usage.current_tokens <= 3.0);
        assert!(usage.current_tokens >= 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_and_reset() {
        let limiter = RateLimiter::new(1, 30.0);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.get_usage().total_requests, 1);

        limiter.reset();
        let usage = limiter.get_usage();
        assert_eq!(usage.total_requests, 0);
        assert!((usage.current_tokens - 1.0).abs() < f64::EPSILON);
        assert!((usage.refill_per_minute - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_config_uses_headroom() {
        let limiter = RateLimiter::from_config(&RateLimitConfig::default());
        let usage = limiter.get_usage();
        assert_eq!(usage.capacity, 10);
        assert!((usage.refill_per_minute - 30.0).abs() < 1e-9);
    }
}
