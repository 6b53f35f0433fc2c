// Fail-open circuit breaker

use crate::config::CircuitBreakerConfig;
use crate::errors::Result;
use crate::rate_limit::clock::{Clock, SystemClock};
use parking_lot::Mutex;
use std::sync::Arc;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Store calls are made normally.
    Closed,
    /// Calls fail open until the recovery period elapses.
    Open,
    /// Recovery elapsed; the next call probes the store.
    HalfOpen,
}

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    open_until: Option<u64>,
}

/// Process-local guard around store calls.
///
/// Consecutive connectivity failures open the breaker for `recovery_seconds`.
/// While open the limiter admits everything without touching the store. The
/// first call after the cool-down probes the store: success closes the
/// breaker, failure reopens it straight away.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a breaker; the threshold and recovery period must be positive
    pub fn new(config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(BreakerState::default()),
            clock: Arc::new(SystemClock),
        })
    }

    /// Override the clock (useful for deterministic tests)
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        let state = self.state.lock();
        match state.open_until {
            None => CircuitState::Closed,
            Some(until) if self.clock.now_millis() < until => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// Whether the store may be contacted. False while open.
    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.open_until.take().is_some() {
            tracing::info!("Circuit breaker closed, store reachable again");
        }
        state.failure_count = 0;
    }

    /// Count a connectivity failure. Returns true when the breaker is now open.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock();
        state.failure_count = state.failure_count.saturating_add(1);

        if state.failure_count < self.config.failure_threshold {
            return false;
        }

        let recovery_ms = self.config.recovery_seconds.saturating_mul(1000);
        state.open_until = Some(self.clock.now_millis().saturating_add(recovery_ms));

        tracing::warn!(
            failure_count = state.failure_count,
            recovery_seconds = self.config.recovery_seconds,
            "Circuit breaker opened, failing open"
        );
        crate::observability::MetricsRecorder::record_breaker_open();

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;
    use std::time::Duration;

    fn breaker(threshold: u32, recovery_seconds: u64) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new(0);
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_seconds,
        })
        .unwrap()
        .with_clock(clock.clone());
        (breaker, clock)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 0,
            recovery_seconds: 10,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_opens_at_threshold() {
        let (breaker, _clock) = breaker(3, 10);

        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Closed);

        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_success_resets_count() {
        let (breaker, _clock) = breaker(3, 10);

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);

        assert!(!breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_recovery() {
        let (breaker, clock) = breaker(2, 10);
        breaker.record_failure();
        breaker.record_failure();

        clock.advance(Duration::from_millis(9_999));
        assert!(!breaker.allow_request());

        clock.advance(Duration::from_millis(1));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_probe_failure_reopens_immediately() {
        let (breaker, clock) = breaker(2, 10);
        breaker.record_failure();
        breaker.record_failure();

        clock.advance(Duration::from_secs(10));
        assert!(breaker.allow_request());

        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Open);

        // Fresh cool-down measured from the failed probe
        clock.advance(Duration::from_secs(9));
        assert!(!breaker.allow_request());
        clock.advance(Duration::from_secs(1));
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let (breaker, _clock) = breaker(1_000, 10);
        let breaker = Arc::new(breaker);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = breaker.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        breaker.record_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(breaker.failure_count(), 800);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
