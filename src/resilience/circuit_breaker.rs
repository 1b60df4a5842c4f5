//! Circuit Breaker
//!
//! Count-based sliding-window circuit breaker protecting Garmin Connect endpoints.
//!
//! Callers take a [`CircuitPermit`] before each attempt and settle it with the
//! attempt's outcome. A permit dropped without being settled (the caller was
//! cancelled, or the error is not the dependency's fault) releases its slot without
//! touching the failure statistics.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::GarminError;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, a single probe is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Use the sliding-window breaker; when false the breaker stays closed.
    pub enabled: bool,
    /// Failure rate (percent) at or above which the circuit opens.
    pub failure_rate_threshold: f32,
    /// Slow-call rate (percent) at or above which the circuit opens.
    pub slow_call_rate_threshold: f32,
    /// Calls taking at least this long are recorded as slow.
    pub slow_call_duration_threshold: Duration,
    /// Time spent open before a probe is allowed.
    pub wait_duration_in_open_state: Duration,
    /// Number of most recent outcomes kept in the window.
    pub sliding_window_size: u32,
    /// Outcomes required before rates are evaluated.
    pub minimum_number_of_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 50.0,
            slow_call_duration_threshold: Duration::from_secs(5),
            wait_duration_in_open_state: Duration::from_secs(60),
            sliding_window_size: 100,
            minimum_number_of_calls: 10,
        }
    }
}

impl CircuitBreakerConfig {
    /// Disabled configuration.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Outcome of a permitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
}

/// Token handed out with each permission; identifies the state epoch it was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermitTicket {
    epoch: u64,
    probe: bool,
}

/// Circuit breaker statistics.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerStats {
    pub total_requests: u32,
    pub successful_requests: u32,
    pub failed_requests: u32,
    pub slow_requests: u32,
    pub rejected_requests: u32,
    pub state_transitions: u32,
}

/// Circuit breaker interface.
pub trait CircuitBreaker: Send + Sync {
    /// Ask for permission to dispatch one call.
    fn try_acquire_permission(&self) -> Result<PermitTicket, GarminError>;

    /// Record the outcome of a permitted call.
    fn on_result(&self, ticket: PermitTicket, outcome: CallOutcome, elapsed: Duration);

    /// Give a permission back without recording an outcome.
    fn release_permission(&self, ticket: PermitTicket);

    /// Get current circuit state.
    fn state(&self) -> CircuitState;

    /// Reset the circuit breaker to closed with an empty window.
    fn reset(&self);

    /// Get circuit breaker statistics.
    fn get_stats(&self) -> CircuitBreakerStats;
}

/// Permission held for the duration of one call.
pub struct CircuitPermit<'a> {
    breaker: &'a dyn CircuitBreaker,
    ticket: PermitTicket,
    started: Instant,
    settled: bool,
}

impl<'a> CircuitPermit<'a> {
    /// Acquire a permit, failing fast with `CircuitOpen` when rejected.
    pub fn acquire(breaker: &'a dyn CircuitBreaker) -> Result<Self, GarminError> {
        let ticket = breaker.try_acquire_permission()?;
        Ok(Self {
            breaker,
            ticket,
            started: Instant::now(),
            settled: false,
        })
    }

    /// Restart the call timer; time spent before this point is not counted
    /// towards slow-call accounting.
    pub fn start_timer(&mut self) {
        self.started = Instant::now();
    }

    /// Settle the permit as a success.
    pub fn record_success(mut self) {
        self.settle(CallOutcome::Success);
    }

    /// Settle the permit as a failure.
    pub fn record_failure(mut self) {
        self.settle(CallOutcome::Failure);
    }

    /// Give the permit back without recording an outcome.
    pub fn release(self) {
        drop(self);
    }

    fn settle(&mut self, outcome: CallOutcome) {
        self.settled = true;
        self.breaker
            .on_result(self.ticket, outcome, self.started.elapsed());
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_permission(self.ticket);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RecordedCall {
    failed: bool,
    slow: bool,
}

struct BreakerState {
    state: CircuitState,
    epoch: u64,
    window: VecDeque<RecordedCall>,
    failures: u32,
    slow_calls: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            epoch: 0,
            window: VecDeque::new(),
            failures: 0,
            slow_calls: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    fn clear_window(&mut self) {
        self.window.clear();
        self.failures = 0;
        self.slow_calls = 0;
    }

    fn push(&mut self, call: RecordedCall, capacity: usize) {
        if self.window.len() >= capacity {
            if let Some(evicted) = self.window.pop_front() {
                self.failures -= evicted.failed as u32;
                self.slow_calls -= evicted.slow as u32;
            }
        }
        self.failures += call.failed as u32;
        self.slow_calls += call.slow as u32;
        self.window.push_back(call);
    }

    fn rate(&self, count: u32) -> f32 {
        if self.window.is_empty() {
            0.0
        } else {
            count as f32 * 100.0 / self.window.len() as f32
        }
    }
}

/// Sliding-window circuit breaker implementation.
pub struct SlidingWindowCircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    stats: Mutex<CircuitBreakerStats>,
}

impl SlidingWindowCircuitBreaker {
    /// Create new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::new()),
            stats: Mutex::new(CircuitBreakerStats::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stats(&self) -> MutexGuard<'_, CircuitBreakerStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn window_capacity(&self) -> usize {
        self.config.sliding_window_size.max(1) as usize
    }

    fn minimum_calls(&self) -> usize {
        (self.config.minimum_number_of_calls.max(1) as usize).min(self.window_capacity())
    }

    fn transition_to(&self, state: &mut BreakerState, new_state: CircuitState) {
        let old_state = state.state;
        state.state = new_state;
        state.epoch += 1;
        state.probe_in_flight = false;

        match new_state {
            CircuitState::Open => {
                state.opened_at = Some(Instant::now());
                warn!(
                    from = %old_state,
                    failure_rate = state.rate(state.failures),
                    slow_call_rate = state.rate(state.slow_calls),
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                debug!("Circuit breaker half-open, allowing a probe call");
            }
            CircuitState::Closed => {
                state.opened_at = None;
                info!(from = %old_state, "Circuit breaker closed");
            }
        }

        state.clear_window();
        self.lock_stats().state_transitions += 1;
    }

    fn maybe_transition_to_half_open(&self, state: &mut BreakerState) {
        if state.state != CircuitState::Open {
            return;
        }
        let elapsed = state.opened_at.map(|at| at.elapsed()).unwrap_or_default();
        if elapsed >= self.config.wait_duration_in_open_state {
            self.transition_to(state, CircuitState::HalfOpen);
        }
    }

    fn remaining_open_time(&self, state: &BreakerState) -> Option<Duration> {
        state.opened_at.map(|at| {
            self.config
                .wait_duration_in_open_state
                .saturating_sub(at.elapsed())
        })
    }

    fn evaluate_window(&self, state: &mut BreakerState) {
        if state.window.len() < self.minimum_calls() {
            return;
        }

        let failure_rate = state.rate(state.failures);
        let slow_call_rate = state.rate(state.slow_calls);

        if failure_rate >= self.config.failure_rate_threshold
            || slow_call_rate >= self.config.slow_call_rate_threshold
        {
            self.transition_to(state, CircuitState::Open);
        }
    }
}

impl Default for SlidingWindowCircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker for SlidingWindowCircuitBreaker {
    fn try_acquire_permission(&self) -> Result<PermitTicket, GarminError> {
        let mut state = self.lock_state();
        self.maybe_transition_to_half_open(&mut state);
        self.lock_stats().total_requests += 1;

        match state.state {
            CircuitState::Closed => Ok(PermitTicket {
                epoch: state.epoch,
                probe: false,
            }),
            CircuitState::HalfOpen if !state.probe_in_flight => {
                state.probe_in_flight = true;
                Ok(PermitTicket {
                    epoch: state.epoch,
                    probe: true,
                })
            }
            CircuitState::HalfOpen => {
                self.lock_stats().rejected_requests += 1;
                Err(GarminError::CircuitOpen { retry_after: None })
            }
            CircuitState::Open => {
                self.lock_stats().rejected_requests += 1;
                Err(GarminError::CircuitOpen {
                    retry_after: self.remaining_open_time(&state),
                })
            }
        }
    }

    fn on_result(&self, ticket: PermitTicket, outcome: CallOutcome, elapsed: Duration) {
        let failed = outcome == CallOutcome::Failure;
        let slow = elapsed >= self.config.slow_call_duration_threshold;

        {
            let mut stats = self.lock_stats();
            if failed {
                stats.failed_requests += 1;
            } else {
                stats.successful_requests += 1;
            }
            if slow {
                stats.slow_requests += 1;
            }
        }

        let mut state = self.lock_state();

        // Outcome of a call permitted before the last transition.
        if ticket.epoch != state.epoch {
            return;
        }

        match state.state {
            CircuitState::Closed => {
                let capacity = self.window_capacity();
                state.push(RecordedCall { failed, slow }, capacity);
                debug!(
                    failed,
                    slow,
                    window = state.window.len(),
                    "Circuit breaker recorded outcome"
                );
                self.evaluate_window(&mut state);
            }
            CircuitState::HalfOpen if ticket.probe => {
                if failed {
                    warn!("Circuit breaker probe failed, reopening circuit");
                    self.transition_to(&mut state, CircuitState::Open);
                } else {
                    self.transition_to(&mut state, CircuitState::Closed);
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn release_permission(&self, ticket: PermitTicket) {
        let mut state = self.lock_state();
        if ticket.probe && ticket.epoch == state.epoch && state.state == CircuitState::HalfOpen {
            state.probe_in_flight = false;
        }
    }

    fn state(&self) -> CircuitState {
        let mut state = self.lock_state();
        self.maybe_transition_to_half_open(&mut state);
        state.state
    }

    fn reset(&self) {
        let mut state = self.lock_state();
        info!("Circuit breaker manually reset");
        self.transition_to(&mut state, CircuitState::Closed);
    }

    fn get_stats(&self) -> CircuitBreakerStats {
        self.lock_stats().clone()
    }
}

/// Circuit breaker used when the breaker is disabled; always closed.
#[derive(Debug, Default)]
pub struct NoOpCircuitBreaker;

impl CircuitBreaker for NoOpCircuitBreaker {
    fn try_acquire_permission(&self) -> Result<PermitTicket, GarminError> {
        Ok(PermitTicket::default())
    }

    fn on_result(&self, _ticket: PermitTicket, _outcome: CallOutcome, _elapsed: Duration) {}

    fn release_permission(&self, _ticket: PermitTicket) {}

    fn state(&self) -> CircuitState {
        CircuitState::Closed
    }

    fn reset(&self) {}

    fn get_stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats::default()
    }
}

/// Create a circuit breaker honoring the `enabled` flag.
pub fn create_circuit_breaker(config: CircuitBreakerConfig) -> Box<dyn CircuitBreaker> {
    if config.enabled {
        Box::new(SlidingWindowCircuitBreaker::new(config))
    } else {
        Box::new(NoOpCircuitBreaker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window: u32, minimum: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(5),
            wait_duration_in_open_state: Duration::from_secs(60),
            sliding_window_size: window,
            minimum_number_of_calls: minimum,
            enabled: true,
        }
    }

    fn record(cb: &dyn CircuitBreaker, outcome: CallOutcome) {
        let ticket = cb.try_acquire_permission().unwrap();
        cb.on_result(ticket, outcome, Duration::from_millis(10));
    }

    #[test]
    fn test_circuit_state() {
        let cb = SlidingWindowCircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_stays_closed_below_minimum_calls() {
        let cb = SlidingWindowCircuitBreaker::new(config(10, 4));

        for _ in 0..3 {
            record(&cb, CallOutcome::Failure);
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        record(&cb, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_opens_at_failure_rate_threshold() {
        let cb = SlidingWindowCircuitBreaker::new(config(10, 4));

        record(&cb, CallOutcome::Success);
        record(&cb, CallOutcome::Failure);
        record(&cb, CallOutcome::Success);
        assert_eq!(cb.state(), CircuitState::Closed);

        // 2 of 4 failed = 50%
        record(&cb, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb.try_acquire_permission();
        assert!(matches!(result, Err(GarminError::CircuitOpen { .. })));
        assert_eq!(cb.get_stats().rejected_requests, 1);
    }

    #[test]
    fn test_window_evicts_oldest_outcomes() {
        let cb = SlidingWindowCircuitBreaker::new(CircuitBreakerConfig {
            failure_rate_threshold: 60.0,
            ..config(4, 4)
        });

        record(&cb, CallOutcome::Failure);
        record(&cb, CallOutcome::Failure);
        record(&cb, CallOutcome::Success);
        record(&cb, CallOutcome::Success);
        assert_eq!(cb.state(), CircuitState::Closed);

        // Window is now [F, S, S, S] then [S, S, S, F]: 25%
        record(&cb, CallOutcome::Success);
        record(&cb, CallOutcome::Success);
        record(&cb, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_slow_calls_open_circuit() {
        let cb = SlidingWindowCircuitBreaker::new(CircuitBreakerConfig {
            slow_call_rate_threshold: 50.0,
            slow_call_duration_threshold: Duration::from_secs(1),
            ..config(4, 2)
        });

        for _ in 0..2 {
            let ticket = cb.try_acquire_permission().unwrap();
            cb.on_result(ticket, CallOutcome::Success, Duration::from_secs(2));
        }

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.get_stats().slow_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_single_probe() {
        let cb = SlidingWindowCircuitBreaker::new(config(2, 2));
        record(&cb, CallOutcome::Failure);
        record(&cb, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;

        let probe = cb.try_acquire_permission().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire_permission().is_err());

        cb.on_result(probe, CallOutcome::Success, Duration::from_millis(5));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let cb = SlidingWindowCircuitBreaker::new(config(1, 1));
        record(&cb, CallOutcome::Failure);

        tokio::time::advance(Duration::from_secs(60)).await;
        let probe = cb.try_acquire_permission().unwrap();
        cb.on_result(probe, CallOutcome::Failure, Duration::from_millis(5));

        assert_eq!(cb.state(), CircuitState::Open);
        match cb.try_acquire_permission() {
            Err(GarminError::CircuitOpen { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(60)));
            }
            other => panic!("expected open circuit, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_permit_frees_slot() {
        let cb = SlidingWindowCircuitBreaker::new(config(1, 1));
        record(&cb, CallOutcome::Failure);
        tokio::time::advance(Duration::from_secs(60)).await;

        {
            let _permit = CircuitPermit::acquire(&cb).unwrap();
            assert!(cb.try_acquire_permission().is_err());
        }

        // Cancelled probe is neither a success nor a failure.
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.get_stats().failed_requests, 1);
        assert!(CircuitPermit::acquire(&cb).is_ok());
    }

    #[test]
    fn test_stale_outcomes_are_ignored() {
        let cb = SlidingWindowCircuitBreaker::new(config(1, 1));
        let in_flight = cb.try_acquire_permission().unwrap();

        record(&cb, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.on_result(in_flight, CallOutcome::Success, Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset() {
        let cb = SlidingWindowCircuitBreaker::new(config(1, 1));
        record(&cb, CallOutcome::Failure);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_disabled_breaker_never_opens() {
        let cb = create_circuit_breaker(CircuitBreakerConfig::disabled());
        for _ in 0..20 {
            record(cb.as_ref(), CallOutcome::Failure);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
