//! Circuit breaker for one remote dependency.
//!
//! - **Closed**: calls pass; consecutive retryable failures are counted and
//!   reaching the threshold opens the circuit.
//! - **Open**: calls fail immediately with `CircuitOpen` until the reset
//!   timeout elapses, then the next call moves the circuit to half-open.
//! - **Half-open**: up to `half_open_requests` probes are admitted. Any probe
//!   failure re-opens; that many successes close and clear the failure count.
//!
//! Only retryable errors count as failures. A validation error says nothing
//! about the health of the remote service.

use crate::config::CircuitBreakerConfig;
use crate::error::{Error, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_success_count: u32,
    /// Cool-down left while open, zero otherwise.
    pub remaining_cooldown_ms: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_successes: u32,
    half_open_admitted: u32,
}

/// Shared circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_requests: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: &str, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: config.reset_timeout(),
            half_open_requests: config.half_open_requests.max(1),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_successes: 0,
                half_open_admitted: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cooldown_left(&self, inner: &Inner) -> Duration {
        inner.last_failure.map_or(Duration::ZERO, |at| {
            self.reset_timeout.saturating_sub(at.elapsed())
        })
    }

    /// Ask permission for one call.
    ///
    /// # Errors
    ///
    /// Returns `CircuitOpen` with the remaining cool-down when the call must
    /// not reach the remote service.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let remaining = self.cooldown_left(&inner);
                if remaining > Duration::ZERO {
                    return Err(Error::CircuitOpen { remaining });
                }
                inner.state = CircuitState::HalfOpen;
                inner.half_open_successes = 0;
                inner.half_open_admitted = 1;
                info!(breaker = %self.name, "circuit half-open, admitting probe");
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.half_open_admitted < self.half_open_requests {
                    inner.half_open_admitted += 1;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen { remaining: Duration::ZERO })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.half_open_requests {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.half_open_successes = 0;
                    inner.half_open_admitted = 0;
                    info!(breaker = %self.name, "circuit closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_successes = 0;
                inner.half_open_admitted = 0;
                warn!(breaker = %self.name, "probe failed, circuit re-opened");
            }
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    cooldown_ms = u64::try_from(self.reset_timeout.as_millis()).unwrap_or(u64::MAX),
                    "circuit opened"
                );
            }
            _ => {}
        }
    }

    /// Give back a half-open probe slot without judging the outcome.
    fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_admitted = inner.half_open_admitted.saturating_sub(1);
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// # Errors
    ///
    /// Returns `CircuitOpen` without running the operation when the circuit
    /// rejects the call, otherwise the operation's own error.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire()?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                if e.is_retryable() {
                    self.record_failure();
                } else {
                    self.release_probe();
                }
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether calls are currently being rejected outright.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let inner = self.lock();
        inner.state == CircuitState::Open && self.cooldown_left(&inner) > Duration::ZERO
    }

    /// Cool-down left before the next probe, zero unless open.
    #[must_use]
    pub fn remaining_cooldown(&self) -> Duration {
        let inner = self.lock();
        if inner.state == CircuitState::Open {
            self.cooldown_left(&inner)
        } else {
            Duration::ZERO
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        let remaining = if inner.state == CircuitState::Open {
            self.cooldown_left(&inner)
        } else {
            Duration::ZERO
        };
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_success_count: inner.half_open_successes,
            remaining_cooldown_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.half_open_successes = 0;
        inner.half_open_admitted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            &CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout_ms: 10_000,
                half_open_requests: 2,
            },
        )
    }

    async fn fail(b: &CircuitBreaker, calls: &AtomicU32) -> Result<()> {
        b.call(|| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::Connection("reset".into()))
        })
        .await
    }

    async fn succeed(b: &CircuitBreaker, calls: &AtomicU32) -> Result<()> {
        b.call(|| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_short_circuits() {
        let b = breaker(3);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(matches!(fail(&b, &calls).await, Err(Error::Connection(_))));
        }
        assert_eq!(b.state(), CircuitState::Open);

        let err = succeed(&b, &calls).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { remaining } if remaining > Duration::ZERO));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_successes_close() {
        let b = breaker(3);
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        succeed(&b, &calls).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        succeed(&b, &calls).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let b = breaker(1);
        let calls = AtomicU32::new(0);
        let _ = fail(&b, &calls).await;
        assert!(b.is_open());

        tokio::time::advance(Duration::from_secs(10)).await;
        let _ = fail(&b, &calls).await;
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.remaining_cooldown() > Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_probes() {
        let b = breaker(1);
        let calls = AtomicU32::new(0);
        let _ = fail(&b, &calls).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(b.try_acquire().is_ok());
        assert!(b.try_acquire().is_ok());
        assert!(matches!(b.try_acquire(), Err(Error::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_non_retryable_error_does_not_trip() {
        let b = breaker(1);
        let result = b
            .call(|| async { Err::<(), _>(Error::Validation("bad payload".into())) })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let b = breaker(2);
        let calls = AtomicU32::new(0);
        let _ = fail(&b, &calls).await;
        succeed(&b, &calls).await.unwrap();
        let _ = fail(&b, &calls).await;
        assert_eq!(b.state(), CircuitState::Closed);
    }
}
