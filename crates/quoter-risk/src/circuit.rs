//! Venue circuit breaker.
//!
//! Closed -> Open when `fail_threshold` failures land inside the rolling
//! window. Open -> HalfOpen once both the cooldown and the minimum dwell
//! have elapsed. HalfOpen admits `trial_count` trials; enough successes
//! close the breaker, any failure reopens it. Cancels are never blocked.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use quoter_telemetry::Metrics;

use crate::throttle::ActionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    fn gauge(&self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitConfig {
    #[serde(default = "default_window_sec")]
    pub window_sec: u64,
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: usize,
    #[serde(default = "default_cooldown_sec")]
    pub cooldown_sec: u64,
    /// Minimum time spent in a state before a recovery transition.
    #[serde(default = "default_min_dwell_sec")]
    pub min_dwell_sec: u64,
    #[serde(default = "default_trial_count")]
    pub trial_count: u32,
}

fn default_window_sec() -> u64 {
    60
}

fn default_fail_threshold() -> usize {
    10
}

fn default_cooldown_sec() -> u64 {
    30
}

fn default_min_dwell_sec() -> u64 {
    30
}

fn default_trial_count() -> u32 {
    1
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            window_sec: default_window_sec(),
            fail_threshold: default_fail_threshold(),
            cooldown_sec: default_cooldown_sec(),
            min_dwell_sec: default_min_dwell_sec(),
            trial_count: default_trial_count(),
        }
    }
}

struct Inner {
    state: CircuitState,
    state_since_ms: u64,
    failures: VecDeque<u64>,
    trials_issued: u32,
    trial_successes: u32,
}

pub struct CircuitBreaker {
    config: CircuitConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                state_since_ms: 0,
                failures: VecDeque::new(),
                trials_issued: 0,
                trial_successes: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether an action of `kind` may go to the venue now.
    pub fn allow(&self, kind: ActionKind, now_ms: u64) -> bool {
        if kind == ActionKind::Cancel {
            return true;
        }
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            let in_state = now_ms.saturating_sub(inner.state_since_ms);
            let wait_ms = self.config.cooldown_sec.max(self.config.min_dwell_sec) * 1_000;
            if in_state < wait_ms {
                return false;
            }
            self.transition(&mut inner, CircuitState::HalfOpen, now_ms);
        }
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.trials_issued < self.config.trial_count {
                    inner.trials_issued += 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => false,
        }
    }

    pub fn record_success(&self, now_ms: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_successes += 1;
            if inner.trial_successes >= self.config.trial_count {
                inner.failures.clear();
                self.transition(&mut inner, CircuitState::Closed, now_ms);
            }
        }
    }

    pub fn record_failure(&self, now_ms: u64) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                let cutoff = now_ms.saturating_sub(self.config.window_sec * 1_000);
                inner.failures.push_back(now_ms);
                while inner.failures.front().is_some_and(|&ts| ts <= cutoff) {
                    inner.failures.pop_front();
                }
                if inner.failures.len() >= self.config.fail_threshold {
                    self.transition(&mut inner, CircuitState::Open, now_ms);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open, now_ms);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut Inner, next: CircuitState, now_ms: u64) {
        let previous = inner.state;
        inner.state = next;
        inner.state_since_ms = now_ms;
        inner.trials_issued = 0;
        inner.trial_successes = 0;
        Metrics::circuit_state(next.gauge());
        match next {
            CircuitState::Open => {
                warn!(from = ?previous, failures = inner.failures.len(), "Circuit breaker opened")
            }
            _ => info!(from = ?previous, to = ?next, "Circuit breaker transition"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitConfig {
            window_sec: 10,
            fail_threshold: 3,
            cooldown_sec: 5,
            min_dwell_sec: 2,
            trial_count: 1,
        })
    }

    #[test]
    fn test_opens_after_threshold_in_window() {
        let cb = breaker();
        cb.record_failure(1_000);
        cb.record_failure(2_000);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(3_000);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow(ActionKind::Create, 3_500));
        assert!(cb.allow(ActionKind::Cancel, 3_500));
    }

    #[test]
    fn test_old_failures_fall_out_of_window() {
        let cb = breaker();
        cb.record_failure(1_000);
        cb.record_failure(2_000);
        cb.record_failure(20_000);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_trial_success_closes() {
        let cb = breaker();
        for ts in [1_000, 1_100, 1_200] {
            cb.record_failure(ts);
        }
        assert!(!cb.allow(ActionKind::Create, 5_000));
        assert!(cb.allow(ActionKind::Create, 6_200));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Only one trial in flight.
        assert!(!cb.allow(ActionKind::Amend, 6_300));

        cb.record_success(6_400);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow(ActionKind::Create, 6_500));
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker();
        for ts in [1_000, 1_100, 1_200] {
            cb.record_failure(ts);
        }
        assert!(cb.allow(ActionKind::Create, 6_200));
        cb.record_failure(6_300);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow(ActionKind::Create, 7_000));
    }
}
