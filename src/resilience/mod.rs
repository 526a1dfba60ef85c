//! Resilience primitives for calls to the remote memory service.
//!
//! - [`RateLimiter`] - token bucket bounding outbound request rate
//! - [`CircuitBreaker`] - short-circuits a persistently failing dependency
//! - [`RetryHandler`] - bounded exponential backoff through the breaker
//!
//! One instance of each exists per remote dependency and is shared by every
//! document sync in the process.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterUsage};
pub use retry::{RetryHandler, RetryPolicy};
