//! Progressive timeouts: each attempt gets more time than the last, up to a cap.
//!
//! Three outcomes are kept apart:
//! - the attempt ran out of time: retry with a longer timeout
//! - the operation returned an error: propagate it, no retry
//! - the caller cancelled: stop immediately, no further budget spent

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressiveTimeoutConfig {
    #[serde(default = "default_initial_timeout_ms")]
    pub initial_timeout_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause between a timed-out attempt and the next one.
    #[serde(default)]
    pub retry_delay_ms: u64,
}

fn default_initial_timeout_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_timeout_ms() -> u64 {
    300_000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ProgressiveTimeoutConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: default_initial_timeout_ms(),
            multiplier: default_multiplier(),
            max_timeout_ms: default_max_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: 0,
        }
    }
}

impl ProgressiveTimeoutConfig {
    pub fn validate(&self) -> Result<(), InvalidTimeoutConfig> {
        if self.initial_timeout_ms == 0 {
            return Err(InvalidTimeoutConfig(
                "initial_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            return Err(InvalidTimeoutConfig(format!(
                "multiplier must be greater than 1 (got {})",
                self.multiplier
            )));
        }
        if self.max_timeout_ms <= self.initial_timeout_ms {
            return Err(InvalidTimeoutConfig(format!(
                "max_timeout_ms ({}) must be greater than initial_timeout_ms ({})",
                self.max_timeout_ms, self.initial_timeout_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid progressive timeout config: {0}")]
pub struct InvalidTimeoutConfig(pub String);

#[derive(Debug, thiserror::Error)]
pub enum ProgressiveTimeoutError<E> {
    #[error(transparent)]
    InvalidConfig(#[from] InvalidTimeoutConfig),
    #[error("operation cancelled during attempt {attempt} after {elapsed_ms}ms")]
    Cancelled { attempt: u32, elapsed_ms: u64 },
    #[error("operation timed out on all {attempts} attempts ({elapsed_ms}ms total)")]
    MaxRetriesExceeded { attempts: u32, elapsed_ms: u64 },
    #[error("operation failed: {0}")]
    Operation(#[source] E),
}

impl<E> ProgressiveTimeoutError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProgressiveTimeoutError::Cancelled { .. })
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, ProgressiveTimeoutError::MaxRetriesExceeded { .. })
    }
}

/// Timeout for a zero-based attempt: `min(initial * multiplier^attempt, max)`.
pub fn calculate_timeout(
    attempt: u32,
    config: &ProgressiveTimeoutConfig,
) -> Result<u64, InvalidTimeoutConfig> {
    config.validate()?;
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let scaled = config.initial_timeout_ms as f64 * config.multiplier.powi(exponent);
    if !scaled.is_finite() || scaled >= config.max_timeout_ms as f64 {
        return Ok(config.max_timeout_ms);
    }
    Ok(scaled.round() as u64)
}

enum AttemptOutcome<T, E> {
    Finished(Result<T, E>),
    TimedOut,
    Cancelled,
}

/// Drive `operation` with progressively longer timeouts.
///
/// Each attempt receives a child of `cancel`; the child is cancelled when the attempt
/// times out so the operation can release what it holds. Cancelling `cancel` itself
/// ends the whole run with [`ProgressiveTimeoutError::Cancelled`].
pub async fn execute_with_progressive_timeout<T, E, F, Fut>(
    mut operation: F,
    config: &ProgressiveTimeoutConfig,
    cancel: &CancellationToken,
) -> Result<T, ProgressiveTimeoutError<E>>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    config.validate()?;
    let started = Instant::now();
    let elapsed_ms = |started: Instant| started.elapsed().as_millis() as u64;

    for attempt in 0..=config.max_retries {
        if cancel.is_cancelled() {
            return Err(ProgressiveTimeoutError::Cancelled {
                attempt,
                elapsed_ms: elapsed_ms(started),
            });
        }

        let timeout_ms = calculate_timeout(attempt, config)?;
        let attempt_token = cancel.child_token();
        tracing::debug!(attempt, timeout_ms, "starting attempt");

        let outcome = {
            let fut = operation(attempt_token.clone());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => AttemptOutcome::Cancelled,
                result = fut => AttemptOutcome::Finished(result),
                _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => AttemptOutcome::TimedOut,
            }
        };

        match outcome {
            AttemptOutcome::Finished(Ok(value)) => return Ok(value),
            AttemptOutcome::Finished(Err(err)) => {
                if cancel.is_cancelled() {
                    return Err(ProgressiveTimeoutError::Cancelled {
                        attempt,
                        elapsed_ms: elapsed_ms(started),
                    });
                }
                return Err(ProgressiveTimeoutError::Operation(err));
            }
            AttemptOutcome::Cancelled => {
                attempt_token.cancel();
                return Err(ProgressiveTimeoutError::Cancelled {
                    attempt,
                    elapsed_ms: elapsed_ms(started),
                });
            }
            AttemptOutcome::TimedOut => {
                attempt_token.cancel();
                tracing::warn!(attempt, timeout_ms, "attempt timed out");
            }
        }

        if attempt < config.max_retries && config.retry_delay_ms > 0 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ProgressiveTimeoutError::Cancelled {
                        attempt: attempt + 1,
                        elapsed_ms: elapsed_ms(started),
                    });
                }
                _ = tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)) => {}
            }
        }
    }

    Err(ProgressiveTimeoutError::MaxRetriesExceeded {
        attempts: config.max_retries + 1,
        elapsed_ms: elapsed_ms(started),
    })
}
