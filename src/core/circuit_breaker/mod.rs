//! Consecutive-failure circuit breaker.
//!
//! ```text
//! Closed    -> Open      threshold consecutive failures
//! Open      -> HalfOpen  reset_time elapsed, one trial admitted
//! HalfOpen  -> Closed    trial succeeded
//! HalfOpen  -> Open      trial failed (cooldown restarts)
//! ```
//!
//! The breaker has no I/O and never awaits. Callers either report outcomes through
//! [`CircuitBreaker::record_success`] and [`CircuitBreaker::record_failure`], or take
//! a [`BreakerPermit`] from [`CircuitBreaker::admit`] and settle it. A trial permit
//! dropped unsettled hands the trial back so the circuit cannot stay half-open.

use crate::core::types::{BreakerStats, CircuitState};
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub threshold: u32,
    /// Cooldown before a half-open trial is admitted.
    pub reset_time: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_time: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BreakerConfigError {
    #[error("circuit breaker threshold must be at least 1")]
    ZeroThreshold,
    #[error("circuit breaker reset time must be greater than zero")]
    ZeroResetTime,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    /// Monotonic time of the last state change, drives the cooldown.
    changed_at: Instant,
    /// Wall-clock time of the last state change, for stats only.
    changed_at_wall: DateTime<Utc>,
    trial_admitted: bool,
    /// Bumped on every transition so a stale permit cannot touch a later trial.
    generation: u64,
}

impl BreakerInner {
    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.changed_at = Instant::now();
        self.changed_at_wall = Utc::now();
        self.trial_admitted = false;
        self.generation = self.generation.wrapping_add(1);
    }
}

enum Admission {
    Closed,
    Trial { generation: u64 },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Result<Self, BreakerConfigError> {
        if config.threshold == 0 {
            return Err(BreakerConfigError::ZeroThreshold);
        }
        if config.reset_time.is_zero() {
            return Err(BreakerConfigError::ZeroResetTime);
        }
        Ok(Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                changed_at: Instant::now(),
                changed_at_wall: Utc::now(),
                trial_admitted: false,
                generation: 0,
            }),
        })
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Admission predicate. May move an expired open circuit to half-open, in which
    /// case exactly one caller is admitted until an outcome is recorded.
    pub fn can_execute(&self) -> bool {
        self.admission().is_some()
    }

    /// Like [`can_execute`](Self::can_execute), but returns a permit that carries the
    /// outcome back. Prefer this when the admitted work can be cancelled.
    pub fn admit(&self) -> Option<BreakerPermit<'_>> {
        let trial = match self.admission()? {
            Admission::Closed => None,
            Admission::Trial { generation } => Some(generation),
        };
        Some(BreakerPermit {
            breaker: self,
            trial,
        })
    }

    fn admission(&self) -> Option<Admission> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(Admission::Closed),
            CircuitState::Open => {
                if inner.changed_at.elapsed() < self.config.reset_time {
                    return None;
                }
                inner.transition(CircuitState::HalfOpen);
                inner.trial_admitted = true;
                tracing::info!(
                    failures = inner.failures,
                    "circuit breaker half-open, admitting trial request"
                );
                Some(Admission::Trial {
                    generation: inner.generation,
                })
            }
            CircuitState::HalfOpen => {
                if inner.trial_admitted {
                    None
                } else {
                    inner.trial_admitted = true;
                    Some(Admission::Trial {
                        generation: inner.generation,
                    })
                }
            }
        }
    }

    fn abandon_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen
            && inner.generation == generation
            && inner.trial_admitted
        {
            inner.trial_admitted = false;
            tracing::debug!("half-open trial ended without an outcome, trial slot released");
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failures = 0;
        if inner.state != CircuitState::Closed {
            inner.transition(CircuitState::Closed);
            tracing::info!("circuit breaker closed after successful request");
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.threshold {
                    inner.transition(CircuitState::Open);
                    tracing::warn!(
                        failures = inner.failures,
                        reset_ms = self.config.reset_time.as_millis() as u64,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.failures = self.config.threshold;
                inner.transition(CircuitState::Open);
                tracing::warn!("circuit breaker trial failed, reopening");
            }
            // Late outcome from a request admitted before the circuit opened.
            CircuitState::Open => {
                inner.failures = self.config.threshold;
            }
        }
    }

    /// Manual override: close the circuit and forget all failures.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failures = 0;
        inner.transition(CircuitState::Closed);
        tracing::info!("circuit breaker manually reset");
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        BreakerStats {
            state: inner.state,
            failures: inner.failures,
            threshold: self.config.threshold,
            reset_time_ms: self.config.reset_time.as_millis() as u64,
            last_transition: inner.changed_at_wall,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Admission granted by [`CircuitBreaker::admit`].
#[must_use = "an unsettled trial permit hands its trial back on drop"]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    /// Generation of the half-open trial this permit holds, if any.
    trial: Option<u64>,
}

impl BreakerPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    pub fn succeeded(mut self) {
        self.trial = None;
        self.breaker.record_success();
    }

    pub fn failed(mut self) {
        self.trial = None;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.trial.take() {
            self.breaker.abandon_trial(generation);
        }
    }
}
