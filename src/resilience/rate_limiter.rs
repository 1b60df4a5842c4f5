//! Rate Limiter
//!
//! Fixed refresh-period rate limiting for Garmin Connect API calls.
//!
//! Each period grants `limit_for_period` permits. A caller that cannot be served in
//! the current period reserves a permit from a future one and sleeps until it
//! starts, provided that happens within `timeout_duration`.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::GarminError;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Use the fixed-window limiter; when false every call is admitted.
    pub enabled: bool,
    /// Permits granted per refresh period.
    pub limit_for_period: u32,
    /// Length of a refresh period.
    pub limit_refresh_period: Duration,
    /// Longest a caller may wait for a permit.
    pub timeout_duration: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit_for_period: 100,
            limit_refresh_period: Duration::from_secs(60),
            timeout_duration: Duration::from_secs(5),
        }
    }
}

impl RateLimiterConfig {
    /// Disabled configuration.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone, Default)]
pub struct RateLimiterStats {
    pub total_requests: u32,
    pub allowed_requests: u32,
    pub delayed_requests: u32,
    pub rejected_requests: u32,
}

/// Rate limiter interface.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Acquire a permit, waiting at most the configured timeout.
    async fn acquire_permission(&self) -> Result<(), GarminError>;

    /// Permits left in the current period; negative when future periods are reserved.
    fn available_permissions(&self) -> i64;

    /// Get rate limiter statistics.
    fn get_stats(&self) -> RateLimiterStats;
}

struct WindowState {
    active_cycle: u64,
    active_permissions: i64,
}

enum Reservation {
    Granted(Duration),
    Denied,
}

/// Fixed-window rate limiter implementation.
pub struct FixedWindowRateLimiter {
    config: RateLimiterConfig,
    origin: Instant,
    state: Mutex<WindowState>,
    stats: Mutex<RateLimiterStats>,
}

impl FixedWindowRateLimiter {
    /// Create new rate limiter.
    pub fn new(config: RateLimiterConfig) -> Self {
        let limit = config.limit_for_period.max(1) as i64;
        Self {
            config,
            origin: Instant::now(),
            state: Mutex::new(WindowState {
                active_cycle: 0,
                active_permissions: limit,
            }),
            stats: Mutex::new(RateLimiterStats::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stats(&self) -> MutexGuard<'_, RateLimiterStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn limit(&self) -> i64 {
        self.config.limit_for_period.max(1) as i64
    }

    fn period_nanos(&self) -> u128 {
        self.config.limit_refresh_period.as_nanos().max(1)
    }

    /// Roll the window forward to the period containing `since_origin`.
    fn refresh(&self, state: &mut WindowState, since_origin: Duration) {
        let cycle = (since_origin.as_nanos() / self.period_nanos()) as u64;
        if cycle > state.active_cycle {
            let elapsed_cycles = (cycle - state.active_cycle) as i64;
            let accumulated = state
                .active_permissions
                .saturating_add(elapsed_cycles.saturating_mul(self.limit()));
            state.active_permissions = accumulated.min(self.limit());
            state.active_cycle = cycle;
        }
    }

    /// Time until a permit becomes available, given the current state.
    fn time_to_permission(&self, state: &WindowState, since_origin: Duration) -> Duration {
        if state.active_permissions > 0 {
            return Duration::ZERO;
        }

        let period = self.period_nanos();
        let next_cycle_start = (state.active_cycle as u128 + 1) * period;
        let to_next_cycle = next_cycle_start.saturating_sub(since_origin.as_nanos());

        let at_next_cycle = state.active_permissions + self.limit();
        let full_cycles = if at_next_cycle >= 1 {
            0
        } else {
            let deficit = (1 - at_next_cycle) as u128;
            deficit.div_ceil(self.limit() as u128)
        };

        let wait = full_cycles * period + to_next_cycle;
        Duration::from_nanos(wait.min(u64::MAX as u128) as u64)
    }

    fn reserve(&self, timeout: Duration) -> Reservation {
        let mut state = self.lock_state();
        let since_origin = Instant::now().saturating_duration_since(self.origin);
        self.refresh(&mut state, since_origin);

        let wait = self.time_to_permission(&state, since_origin);
        if wait <= timeout {
            state.active_permissions -= 1;
            Reservation::Granted(wait)
        } else {
            Reservation::Denied
        }
    }
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn acquire_permission(&self) -> Result<(), GarminError> {
        let timeout = self.config.timeout_duration;
        self.lock_stats().total_requests += 1;

        match self.reserve(timeout) {
            Reservation::Granted(wait) => {
                if !wait.is_zero() {
                    self.lock_stats().delayed_requests += 1;
                    debug!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit permit");
                    tokio::time::sleep(wait).await;
                }
                self.lock_stats().allowed_requests += 1;
                Ok(())
            }
            Reservation::Denied => {
                if !timeout.is_zero() {
                    tokio::time::sleep(timeout).await;
                }
                self.lock_stats().rejected_requests += 1;
                warn!(timeout_ms = timeout.as_millis() as u64, "Rate limit exceeded");
                Err(GarminError::RateLimitExceeded { timeout })
            }
        }
    }

    fn available_permissions(&self) -> i64 {
        let mut state = self.lock_state();
        let since_origin = Instant::now().saturating_duration_since(self.origin);
        self.refresh(&mut state, since_origin);
        state.active_permissions
    }

    fn get_stats(&self) -> RateLimiterStats {
        self.lock_stats().clone()
    }
}

/// Rate limiter used when limiting is disabled; admits every call.
#[derive(Debug, Default)]
pub struct UnlimitedRateLimiter;

#[async_trait]
impl RateLimiter for UnlimitedRateLimiter {
    async fn acquire_permission(&self) -> Result<(), GarminError> {
        Ok(())
    }

    fn available_permissions(&self) -> i64 {
        i64::MAX
    }

    fn get_stats(&self) -> RateLimiterStats {
        RateLimiterStats::default()
    }
}

/// Create a rate limiter honoring the `enabled` flag.
pub fn create_rate_limiter(config: RateLimiterConfig) -> Box<dyn RateLimiter> {
    if config.enabled {
        Box::new(FixedWindowRateLimiter::new(config))
    } else {
        Box::new(UnlimitedRateLimiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, period_secs: u64, timeout_secs: u64) -> FixedWindowRateLimiter {
        FixedWindowRateLimiter::new(RateLimiterConfig {
            enabled: true,
            limit_for_period: limit,
            limit_refresh_period: Duration::from_secs(period_secs),
            timeout_duration: Duration::from_secs(timeout_secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_limit_without_waiting() {
        let limiter = limiter(3, 60, 0);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire_permission().await.unwrap();
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.available_permissions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_fails_immediately() {
        let limiter = limiter(1, 60, 0);
        limiter.acquire_permission().await.unwrap();

        let start = Instant::now();
        let result = limiter.acquire_permission().await;

        assert!(matches!(result, Err(GarminError::RateLimitExceeded { .. })));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.get_stats().rejected_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_next_period_within_timeout() {
        let limiter = limiter(1, 2, 5);
        limiter.acquire_permission().await.unwrap();

        let start = Instant::now();
        limiter.acquire_permission().await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(limiter.get_stats().delayed_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_full_timeout_before_failing() {
        let limiter = limiter(1, 60, 5);
        limiter.acquire_permission().await.unwrap();

        let start = Instant::now();
        let result = limiter.acquire_permission().await;

        assert!(matches!(
            result,
            Err(GarminError::RateLimitExceeded { timeout }) if timeout == Duration::from_secs(5)
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reservations_consume_future_periods() {
        let limiter = limiter(1, 1, 10);
        limiter.acquire_permission().await.unwrap();

        // Second and third callers reserve periods 1 and 2.
        let second = limiter.reserve(Duration::from_secs(10));
        let third = limiter.reserve(Duration::from_secs(10));

        assert!(matches!(second, Reservation::Granted(w) if w == Duration::from_secs(1)));
        assert!(matches!(third, Reservation::Granted(w) if w == Duration::from_secs(2)));
        assert_eq!(limiter.available_permissions(), -2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permissions_refill_after_period() {
        let limiter = limiter(2, 10, 0);
        limiter.acquire_permission().await.unwrap();
        limiter.acquire_permission().await.unwrap();
        assert!(limiter.acquire_permission().await.is_err());

        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(limiter.available_permissions(), 2);
        assert!(limiter.acquire_permission().await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_limiter_admits_everything() {
        let limiter = create_rate_limiter(RateLimiterConfig::disabled());
        for _ in 0..1000 {
            limiter.acquire_permission().await.unwrap();
        }
    }
}
