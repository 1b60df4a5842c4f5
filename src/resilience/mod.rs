//! Resilience
//!
//! Resilience patterns for Garmin Connect requests.
//!
//! This module provides:
//!
//! - **Retry**: Fixed or exponential backoff for transient failures
//! - **Circuit Breaker**: Sliding-window protection against a failing dependency
//! - **Rate Limiter**: Fixed refresh-period permit budget
//! - **Pipeline**: The three policies composed around one request

pub mod circuit_breaker;
pub mod pipeline;
pub mod rate_limiter;
pub mod retry;

// Retry
pub use retry::{
    create_retry_policy, execute_with_retry, BackoffRetryPolicy, NoRetry, RetryConfig, RetryEvent,
    RetryPolicy, RetryStats,
};

// Circuit Breaker
pub use circuit_breaker::{
    create_circuit_breaker, CallOutcome, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerStats, CircuitPermit, CircuitState, NoOpCircuitBreaker, PermitTicket,
    SlidingWindowCircuitBreaker,
};

// Rate Limiter
pub use rate_limiter::{
    create_rate_limiter, FixedWindowRateLimiter, RateLimiter, RateLimiterConfig,
    RateLimiterStats, UnlimitedRateLimiter,
};

// Pipeline
pub use pipeline::{ResilienceConfig, ResiliencePipeline, ResilienceStats};
