//! Retry with exponential backoff, routed through a circuit breaker.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::resilience::CircuitBreaker;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            multiplier: config.multiplier,
            max_delay: config.max_delay(),
        }
    }

    /// `min(base * multiplier^attempt, max)`, with `attempt` counted from 0.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(millis.round() as u64)
        }
    }

    /// Delay before the next attempt. A server retry-after hint wins over
    /// the schedule but never exceeds `max_delay`.
    #[must_use]
    pub fn next_delay(&self, attempt: u32, error: &Error) -> Duration {
        error
            .retry_after()
            .map_or_else(|| self.delay_for(attempt), |hint| hint.min(self.max_delay))
    }
}

/// Runs remote operations with bounded retries.
#[derive(Debug, Clone)]
pub struct RetryHandler {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl RetryHandler {
    #[must_use]
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self { policy, breaker }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `operation`, retrying retryable failures.
    ///
    /// `context` names the call in log output.
    ///
    /// # Errors
    ///
    /// - `CircuitOpen` as soon as the breaker rejects a call
    /// - any non-retryable error unchanged, without consuming a retry
    /// - `MaxRetriesExceeded` wrapping the last cause once retries run out
    pub async fn execute_with_retry<T, F, Fut>(&self, context: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match self.breaker.call(&mut operation).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempt >= self.policy.max_retries {
                        return Err(Error::MaxRetriesExceeded {
                            attempts: attempt + 1,
                            source: Box::new(e),
                        });
                    }
                    let delay = self.policy.next_delay(attempt, &e);
                    warn!(
                        context,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn handler(max_retries: u32, threshold: u32) -> RetryHandler {
        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            &CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout_ms: 60_000,
                half_open_requests: 2,
            },
        ));
        RetryHandler::new(
            RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(100),
                multiplier: 2.0,
                max_delay: Duration::from_millis(1_000),
            },
            breaker,
        )
    }

    #[test]
    fn test_delay_schedule_caps() {
        let policy = handler(3, 5).policy().clone();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_retry_after_hint_overrides_but_is_capped() {
        let policy = handler(3, 5).policy().clone();
        let short = Error::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_millis(50)),
        };
        assert_eq!(policy.next_delay(2, &short), Duration::from_millis(50));
        let long = Error::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(120)),
        };
        assert_eq!(policy.next_delay(0, &long), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let h = handler(3, 10);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let start = Instant::now();

        let value = h
            .execute_with_retry("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Connection("reset".into()))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_sets_backoff() {
        let h = handler(3, 10);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let start = Instant::now();

        let value = h
            .execute_with_retry("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::RateLimited {
                        message: "429".into(),
                        retry_after: Some(Duration::from_millis(700)),
                    })
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(700), "{waited:?}");
        assert!(waited < Duration::from_millis(800), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_retries() {
        let h = handler(3, 10);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let err = h
            .execute_with_retry("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Connection("down".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MaxRetriesExceeded { attempts: 4, .. }));
        assert!(matches!(err.root_cause(), Error::Connection(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_propagates_immediately() {
        let h = handler(3, 10);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let err = h
            .execute_with_retry("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Remote { status: 400, message: "bad".into() })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote { status: 400, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_breaker_opens() {
        let h = handler(5, 2);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let err = h
            .execute_with_retry("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Connection("down".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
