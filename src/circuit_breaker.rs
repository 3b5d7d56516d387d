//! Per-source circuit breaker
//!
//! Three states: `CLOSED → OPEN → HALF_OPEN → CLOSED`. A rolling window of
//! recent outcomes decides the `CLOSED → OPEN` transition; `OPEN` schedules
//! a timed transition to `HALF_OPEN`; `HALF_OPEN` admits a bounded number
//! of probes and decides the outcome from their results.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::errors::CircuitBreakerError;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Failure rate (0.0-1.0) that trips CLOSED -> OPEN.
    pub failure_threshold: f64,
    /// Minimum sample count before the failure rate is evaluated.
    pub min_samples: u32,
    /// Size of the rolling outcome window.
    pub window_size: usize,
    /// How long OPEN waits before allowing probes.
    pub cool_down: Duration,
    /// Ceiling for `cool_down` after repeated HALF_OPEN failures.
    pub cool_down_max: Duration,
    /// Concurrent probes admitted in HALF_OPEN.
    pub probe_count: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            min_samples: 5,
            window_size: 20,
            cool_down: Duration::from_secs(30),
            cool_down_max: Duration::from_secs(480),
            probe_count: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    config: CircuitBreakerConfig,
    state: Mutex<StateData>,
}

struct StateData {
    state: CircuitState,
    outcomes: Vec<bool>, // true = success
    opened_at: Option<Instant>,
    current_cool_down: Duration,
    probes_in_flight: u32,
    probes_succeeded: u32,
    probes_failed: u32,
}

/// Three-state failure isolator wrapping one source's calls.
pub struct CircuitBreaker {
    inner: Inner,
}

/// A token representing an admitted call; `report` must be called exactly once.
pub struct Admission {
    was_probe: bool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let cool_down = config.cool_down;
        Self {
            inner: Inner {
                config,
                state: Mutex::new(StateData {
                    state: CircuitState::Closed,
                    outcomes: Vec::new(),
                    opened_at: None,
                    current_cool_down: cool_down,
                    probes_in_flight: 0,
                    probes_succeeded: 0,
                    probes_failed: 0,
                }),
            },
        }
    }

    pub fn state(&self) -> CircuitState {
        self.transition_if_due();
        self.inner.state.lock().state
    }

    /// Transition OPEN -> HALF_OPEN if `cool_down` has elapsed.
    fn transition_if_due(&self) {
        let mut s = self.inner.state.lock();
        if s.state == CircuitState::Open {
            if let Some(opened_at) = s.opened_at {
                if Instant::now().saturating_duration_since(opened_at) >= s.current_cool_down {
                    s.state = CircuitState::HalfOpen;
                    s.probes_in_flight = 0;
                    s.probes_succeeded = 0;
                    s.probes_failed = 0;
                }
            }
        }
    }

    /// Ask permission to make a call. `Cancelled` calls must never reach
    /// `report` — a fetch cancelled by the caller (not a failure of the
    /// source itself) must never be counted against the breaker.
    pub fn admit(&self) -> Result<Admission, CircuitBreakerError> {
        self.transition_if_due();
        let mut s = self.inner.state.lock();
        match s.state {
            CircuitState::Closed => Ok(Admission { was_probe: false }),
            CircuitState::Open => Err(CircuitBreakerError::Open),
            CircuitState::HalfOpen => {
                if s.probes_in_flight >= self.inner.config.probe_count {
                    Err(CircuitBreakerError::Open)
                } else {
                    s.probes_in_flight += 1;
                    Ok(Admission { was_probe: true })
                }
            }
        }
    }

    /// Report the outcome of an admitted call. 4xx-not-429 permanent errors
    /// should be reported via [`Self::report_permanent_error`] instead —
    /// they do not count toward the breaker's failure rate at all.
    pub fn report(&self, admission: Admission, success: bool) {
        let mut s = self.inner.state.lock();
        match s.state {
            CircuitState::Closed => {
                s.outcomes.push(success);
                if s.outcomes.len() > self.inner.config.window_size {
                    s.outcomes.remove(0);
                }
                if s.outcomes.len() as u32 >= self.inner.config.min_samples {
                    let failures = s.outcomes.iter().filter(|o| !**o).count();
                    let rate = failures as f64 / s.outcomes.len() as f64;
                    if rate >= self.inner.config.failure_threshold {
                        s.state = CircuitState::Open;
                        s.opened_at = Some(Instant::now());
                        s.outcomes.clear();
                    }
                }
            }
            CircuitState::HalfOpen => {
                debug_assert!(admission.was_probe);
                s.probes_in_flight = s.probes_in_flight.saturating_sub(1);
                if success {
                    s.probes_succeeded += 1;
                } else {
                    s.probes_failed += 1;
                }
                if s.probes_failed > 0 {
                    s.state = CircuitState::Open;
                    s.opened_at = Some(Instant::now());
                    s.current_cool_down = (s.current_cool_down * 2).min(self.inner.config.cool_down_max);
                } else if s.probes_succeeded >= self.inner.config.probe_count {
                    s.state = CircuitState::Closed;
                    s.current_cool_down = self.inner.config.cool_down;
                    s.outcomes.clear();
                }
            }
            CircuitState::Open => {
                // Shouldn't normally happen (admit() would have rejected),
                // but stay defensive against races between admit/report.
            }
        }
    }

    /// A permanent (non-429) 4xx never counts toward the breaker.
    pub fn report_permanent_error(&self, _admission: Admission) {
        // Intentionally a no-op: a client bug shouldn't trip the breaker.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 0.5,
            min_samples: 4,
            window_size: 10,
            cool_down: Duration::from_millis(50),
            cool_down_max: Duration::from_secs(1),
            probe_count: 1,
        });
        for _ in 0..2 {
            let a = cb.admit().unwrap();
            cb.report(a, true);
        }
        for _ in 0..2 {
            let a = cb.admit().unwrap();
            cb.report(a, false);
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.admit().is_err());
    }

    #[test]
    fn half_open_all_probes_succeed_closes() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 0.1,
            min_samples: 1,
            window_size: 10,
            cool_down: Duration::from_millis(1),
            cool_down_max: Duration::from_secs(1),
            probe_count: 1,
        });
        let a = cb.admit().unwrap();
        cb.report(a, false);
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let a = cb.admit().unwrap();
        cb.report(a, true);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_and_doubles_cool_down() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 0.1,
            min_samples: 1,
            window_size: 10,
            cool_down: Duration::from_millis(1),
            cool_down_max: Duration::from_secs(10),
            probe_count: 1,
        });
        let a = cb.admit().unwrap();
        cb.report(a, false);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let a = cb.admit().unwrap();
        cb.report(a, false);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.inner.state.lock().current_cool_down, Duration::from_millis(2));
    }

    #[test]
    fn open_to_closed_never_skips_half_open() {
        // Structural guarantee: CircuitState has no direct Open->Closed
        // transition in `report` — only HalfOpen success does so.
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        let a = cb.admit().unwrap();
        cb.report(a, true);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn permanent_error_does_not_move_outcomes() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        let a = cb.admit().unwrap();
        cb.report_permanent_error(a);
        assert_eq!(cb.inner.state.lock().outcomes.len(), 0);
    }
}
