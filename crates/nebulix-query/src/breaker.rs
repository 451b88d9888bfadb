//! Consecutive-failure circuit breaker guarding the graph service.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    pub state: Option<CircuitState>,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub times_opened: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    total_calls: u64,
    rejected_calls: u64,
    successes: u64,
    failures: u64,
    times_opened: u64,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitState) {
        if self.state == to {
            return;
        }
        tracing::info!(from = %self.state, to = %to, "circuit breaker state change");
        self.state = to;
        match to {
            CircuitState::Open => {
                self.opened_at = Some(Instant::now());
                self.times_opened += 1;
            }
            CircuitState::Closed => {
                self.opened_at = None;
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn refresh(&mut self, reset_timeout: Duration) {
        if self.state == CircuitState::Open
            && self
                .opened_at
                .is_some_and(|at| at.elapsed() >= reset_timeout)
        {
            self.transition(CircuitState::HalfOpen);
        }
    }
}

/// Closed: calls pass and consecutive failures are counted. Open: calls
/// fail with [`EngineError::CircuitOpen`] without running. After the reset
/// timeout a single half-open trial is admitted; its outcome closes or
/// reopens the circuit.
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    reset_timeout: Duration,
    enabled: bool,
}

/// Admission ticket for one call. Releases the half-open trial slot if the
/// call is dropped before reporting an outcome.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(success, self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                total_calls: 0,
                rejected_calls: 0,
                successes: 0,
                failures: 0,
                times_opened: 0,
            }),
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: config.reset_timeout(),
            enabled: config.enabled,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Result<Permit<'_>, EngineError> {
        let mut s = self.lock();
        s.total_calls += 1;
        s.refresh(self.reset_timeout);
        let trial = match s.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen if !s.trial_in_flight => {
                s.trial_in_flight = true;
                true
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                s.rejected_calls += 1;
                tracing::debug!(state = %s.state, "circuit breaker rejected call");
                return Err(EngineError::CircuitOpen);
            }
        };
        Ok(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn record(&self, success: bool, trial: bool) {
        let mut s = self.lock();
        if trial {
            s.trial_in_flight = false;
        }
        if success {
            s.successes += 1;
            s.consecutive_failures = 0;
            if s.state == CircuitState::HalfOpen {
                s.transition(CircuitState::Closed);
            }
        } else {
            s.failures += 1;
            s.consecutive_failures += 1;
            match s.state {
                CircuitState::HalfOpen => s.transition(CircuitState::Open),
                CircuitState::Closed if s.consecutive_failures >= self.failure_threshold => {
                    tracing::warn!(
                        failures = s.consecutive_failures,
                        threshold = self.failure_threshold,
                        "circuit breaker tripped"
                    );
                    s.transition(CircuitState::Open);
                }
                _ => {}
            }
        }
    }

    /// Run `operation` under the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CircuitOpen`] without calling `operation` while
    /// the circuit is open, otherwise whatever `operation` returns.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        if !self.enabled {
            return operation().await;
        }
        let permit = self.admit()?;
        let result = operation().await;
        permit.settle(result.is_ok());
        result
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut s = self.lock();
        s.refresh(self.reset_timeout);
        s.state
    }

    /// Force the circuit closed and clear the failure streak.
    pub fn reset(&self) {
        let mut s = self.lock();
        s.trial_in_flight = false;
        s.transition(CircuitState::Closed);
        s.consecutive_failures = 0;
    }

    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut s = self.lock();
        s.refresh(self.reset_timeout);
        CircuitBreakerStats {
            state: Some(s.state),
            consecutive_failures: s.consecutive_failures,
            total_calls: s.total_calls,
            rejected_calls: s.rejected_calls,
            successes: s.successes,
            failures: s.failures,
            times_opened: s.times_opened,
        }
    }
}
