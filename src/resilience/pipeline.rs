//! Resilience Pipeline
//!
//! Composes retry, circuit breaker and rate limiter around a single request.
//!
//! Order per call: retry wraps every attempt; inside each attempt the precheck runs
//! first, then the circuit breaker permit is taken, then the rate limiter permit,
//! then the operation itself.

use std::future::Future;
use std::sync::Arc;

use super::circuit_breaker::{
    create_circuit_breaker, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats,
    CircuitPermit, CircuitState,
};
use super::rate_limiter::{create_rate_limiter, RateLimiter, RateLimiterConfig, RateLimiterStats};
use super::retry::{create_retry_policy, execute_with_retry, RetryConfig, RetryPolicy, RetryStats};
use crate::error::GarminError;

/// Configuration for all three policies.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub retry: RetryConfig,
}

impl ResilienceConfig {
    /// Every policy disabled: single attempt, never rejected, never throttled.
    pub fn disabled() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::disabled(),
            rate_limiter: RateLimiterConfig::disabled(),
            retry: RetryConfig::disabled(),
        }
    }
}

/// Snapshot of all policy statistics.
#[derive(Debug, Clone)]
pub struct ResilienceStats {
    pub circuit_state: CircuitState,
    pub circuit_breaker: CircuitBreakerStats,
    pub rate_limiter: RateLimiterStats,
    pub retry: RetryStats,
}

/// Retry, circuit breaker and rate limiter applied in a fixed order.
#[derive(Clone)]
pub struct ResiliencePipeline {
    retry: Arc<dyn RetryPolicy>,
    circuit_breaker: Arc<dyn CircuitBreaker>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl ResiliencePipeline {
    /// Build the pipeline from configuration; disabled policies become no-ops.
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            retry: Arc::from(create_retry_policy(config.retry.clone())),
            circuit_breaker: Arc::from(create_circuit_breaker(config.circuit_breaker.clone())),
            rate_limiter: Arc::from(create_rate_limiter(config.rate_limiter.clone())),
        }
    }

    /// Build the pipeline from explicit policy instances.
    pub fn from_parts(
        retry: Arc<dyn RetryPolicy>,
        circuit_breaker: Arc<dyn CircuitBreaker>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            retry,
            circuit_breaker,
            rate_limiter,
        }
    }

    /// Pipeline with every policy disabled.
    pub fn passthrough() -> Self {
        Self::new(&ResilienceConfig::disabled())
    }

    /// Get the circuit breaker.
    pub fn circuit_breaker(&self) -> &Arc<dyn CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Get the rate limiter.
    pub fn rate_limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.rate_limiter
    }

    /// Get the retry policy.
    pub fn retry_policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.retry
    }

    /// Run `operation` through the pipeline.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, GarminError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GarminError>>,
    {
        self.execute_guarded(|| Ok(()), |_| operation()).await
    }

    /// Run `operation` through the pipeline, evaluating `precheck` at the start of
    /// every attempt. A failing precheck ends the attempt before any permit is
    /// taken; its value is handed to the operation.
    pub async fn execute_guarded<P, T, G, F, Fut>(
        &self,
        precheck: G,
        operation: F,
    ) -> Result<T, GarminError>
    where
        G: Fn() -> Result<P, GarminError>,
        F: Fn(P) -> Fut,
        Fut: Future<Output = Result<T, GarminError>>,
    {
        execute_with_retry(self.retry.as_ref(), || self.attempt(&precheck, &operation)).await
    }

    async fn attempt<P, T, G, F, Fut>(&self, precheck: &G, operation: &F) -> Result<T, GarminError>
    where
        G: Fn() -> Result<P, GarminError>,
        F: Fn(P) -> Fut,
        Fut: Future<Output = Result<T, GarminError>>,
    {
        let input = precheck()?;

        let mut permit = CircuitPermit::acquire(self.circuit_breaker.as_ref())?;
        self.rate_limiter.acquire_permission().await?;
        permit.start_timer();

        match operation(input).await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(error) if error.should_circuit_break() => {
                permit.record_failure();
                Err(error)
            }
            Err(error) => {
                permit.release();
                Err(error)
            }
        }
    }

    /// Snapshot of all policy statistics.
    pub fn stats(&self) -> ResilienceStats {
        ResilienceStats {
            circuit_state: self.circuit_breaker.state(),
            circuit_breaker: self.circuit_breaker.get_stats(),
            rate_limiter: self.rate_limiter.get_stats(),
            retry: self.retry.get_stats(),
        }
    }
}

impl Default for ResiliencePipeline {
    fn default() -> Self {
        Self::new(&ResilienceConfig::default())
    }
}

impl std::fmt::Debug for ResiliencePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResiliencePipeline")
            .field("circuit_state", &self.circuit_breaker.state())
            .field("max_attempts", &self.retry.max_attempts())
            .finish()
    }
}
