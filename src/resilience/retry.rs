//! Retry Logic
//!
//! Fixed or exponential backoff retry for Garmin Connect requests.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::GarminError;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Use the backoff policy; when false every request gets a single attempt.
    pub enabled: bool,
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub wait_duration: Duration,
    /// Grow the wait geometrically between retries.
    pub exponential_backoff: bool,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Upper bound for a single wait.
    pub max_wait_duration: Duration,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            wait_duration: Duration::from_millis(500),
            exponential_backoff: true,
            multiplier: 2.0,
            max_wait_duration: Duration::from_secs(30),
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// Disabled configuration.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Events reported by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// An attempt is about to be dispatched.
    Attempt,
    /// The operation succeeded after at least one retry.
    SucceededAfterRetry,
    /// The operation failed with a non-retryable error.
    FailedWithoutRetry,
    /// The operation failed on its last allowed attempt.
    Exhausted,
}

/// Retry statistics.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub total_attempts: u32,
    pub successful_retries: u32,
    pub failed_operations: u32,
    pub exhausted_operations: u32,
}

/// Retry policy interface.
pub trait RetryPolicy: Send + Sync {
    /// Maximum number of attempts, including the first one.
    fn max_attempts(&self) -> u32;

    /// Check if an error is retryable.
    fn is_retryable(&self, error: &GarminError) -> bool {
        error.is_retryable()
    }

    /// Wait after the given (1-based) failed attempt.
    fn backoff(&self, attempt: u32) -> Duration;

    /// Observe a retry event.
    fn record(&self, _event: RetryEvent) {}

    /// Get retry statistics.
    fn get_stats(&self) -> RetryStats {
        RetryStats::default()
    }
}

/// Backoff retry policy implementation.
pub struct BackoffRetryPolicy {
    config: RetryConfig,
    stats: Mutex<RetryStats>,
}

impl BackoffRetryPolicy {
    /// Create new retry policy.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    fn lock_stats(&self) -> MutexGuard<'_, RetryStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.config.wait_duration.as_secs_f64();
        let delay = if self.config.exponential_backoff {
            base * self.config.multiplier.powi(attempt.saturating_sub(1) as i32)
        } else {
            base
        };

        let capped_delay = delay.min(self.config.max_wait_duration.as_secs_f64());

        let jitter_range = capped_delay * self.config.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            (rand::random::<f64>() - 0.5) * 2.0 * jitter_range
        } else {
            0.0
        };

        Duration::try_from_secs_f64((capped_delay + jitter).max(0.0)).unwrap_or_default()
    }
}

impl Default for BackoffRetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy for BackoffRetryPolicy {
    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.calculate_delay(attempt)
    }

    fn record(&self, event: RetryEvent) {
        let mut stats = self.lock_stats();
        match event {
            RetryEvent::Attempt => stats.total_attempts += 1,
            RetryEvent::SucceededAfterRetry => stats.successful_retries += 1,
            RetryEvent::FailedWithoutRetry => stats.failed_operations += 1,
            RetryEvent::Exhausted => {
                stats.failed_operations += 1;
                stats.exhausted_operations += 1;
            }
        }
    }

    fn get_stats(&self) -> RetryStats {
        self.lock_stats().clone()
    }
}

/// Retry policy used when retry is disabled; one attempt only.
#[derive(Debug, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn max_attempts(&self) -> u32 {
        1
    }

    fn backoff(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Create a retry policy honoring the `enabled` flag.
pub fn create_retry_policy(config: RetryConfig) -> Box<dyn RetryPolicy> {
    if config.enabled {
        Box::new(BackoffRetryPolicy::new(config))
    } else {
        Box::new(NoRetry)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted. The last observed error is returned.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &dyn RetryPolicy,
    mut operation: F,
) -> Result<T, GarminError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GarminError>>,
{
    let max_attempts = policy.max_attempts().max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        policy.record(RetryEvent::Attempt);

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    policy.record(RetryEvent::SucceededAfterRetry);
                    debug!(attempt, "Request succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) if !policy.is_retryable(&error) => {
                policy.record(RetryEvent::FailedWithoutRetry);
                return Err(error);
            }
            Err(error) if attempt >= max_attempts => {
                policy.record(RetryEvent::Exhausted);
                warn!(attempts = attempt, error = %error, "Retry attempts exhausted");
                return Err(error);
            }
            Err(error) => {
                let delay = policy.backoff(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after failed attempt"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
