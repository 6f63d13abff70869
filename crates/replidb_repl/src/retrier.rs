//! Bounded retry of a unit of work, driven by hints.

use crate::config::RetryConfig;
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Hint about the work being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryHint {
    /// Giving up is expensive; allow more attempts.
    Critical,
    /// Someone is waiting; keep delays short.
    TimeSensible,
}

/// Outcome of a failed attempt, as reported by the retried closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError<E> {
    /// The failure is transient; try again if the budget allows.
    Retry(E),
    /// The failure is permanent; stop now.
    Abort(E),
}

/// Terminal failure of a retried unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// An attempt failed with a non-retryable error.
    Aborted {
        /// Attempts made, including the aborting one.
        attempts: u32,
        /// The aborting error.
        error: E,
    },
    /// Every attempt allowed by the budget failed.
    GaveUp {
        /// Attempts made.
        attempts: u32,
        /// Error of the last attempt.
        last_error: E,
    },
}

impl<E> RetryError<E> {
    /// Returns the number of attempts made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Aborted { attempts, .. } | RetryError::GaveUp { attempts, .. } => *attempts,
        }
    }

    /// Returns true if the work was aborted rather than exhausted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, RetryError::Aborted { .. })
    }

    /// Returns the error of the last attempt.
    pub fn into_error(self) -> E {
        match self {
            RetryError::Aborted { error, .. } => error,
            RetryError::GaveUp { last_error, .. } => last_error,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Aborted { attempts, error } => {
                write!(f, "aborted on attempt {attempts}: {error}")
            }
            RetryError::GaveUp {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempt(s): {last_error}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::Aborted { error, .. } => Some(error),
            RetryError::GaveUp { last_error, .. } => Some(last_error),
        }
    }
}

/// Runs a unit of work under a bounded retry policy.
pub trait Retrier: Send + Sync {
    /// Calls `op` with the 1-based attempt number until it succeeds, aborts
    /// or the attempt budget selected by `hints` runs out.
    ///
    /// Exhaustion always yields [`RetryError::GaveUp`].
    fn retry<T, E, F>(&self, op: F, hints: &[RetryHint]) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, AttemptError<E>>,
        E: fmt::Display;
}

/// Retrier with exponential backoff whose budget and delays follow the
/// hints.
///
/// - [`RetryHint::Critical`] raises the budget to
///   [`RetryConfig::critical_max_attempts`].
/// - [`RetryHint::TimeSensible`] caps every delay at
///   [`RetryConfig::time_sensible_max_delay`].
#[derive(Debug, Clone, Default)]
pub struct SmartRetrier {
    config: RetryConfig,
}

impl SmartRetrier {
    /// Creates a retrier with the given policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns the attempt budget for a set of hints.
    pub fn max_attempts(&self, hints: &[RetryHint]) -> u32 {
        let attempts = if hints.contains(&RetryHint::Critical) {
            self.config.critical_max_attempts
        } else {
            self.config.max_attempts
        };
        attempts.max(1)
    }

    /// Returns the delay before `attempt` for a set of hints.
    pub fn delay(&self, attempt: u32, hints: &[RetryHint]) -> Duration {
        let cap = if hints.contains(&RetryHint::TimeSensible) {
            self.config
                .time_sensible_max_delay
                .min(self.config.max_delay)
        } else {
            self.config.max_delay
        };
        self.config.delay_for_attempt(attempt, cap)
    }
}

impl Retrier for SmartRetrier {
    fn retry<T, E, F>(&self, mut op: F, hints: &[RetryHint]) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, AttemptError<E>>,
        E: fmt::Display,
    {
        let max_attempts = self.max_attempts(hints);
        let mut attempt = 1;

        loop {
            let delay = self.delay(attempt, hints);
            if !delay.is_zero() {
                thread::sleep(delay);
            }

            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(AttemptError::Abort(error)) => {
                    debug!(attempt, %error, "retry aborted");
                    return Err(RetryError::Aborted {
                        attempts: attempt,
                        error,
                    });
                }
                Err(AttemptError::Retry(error)) if attempt >= max_attempts => {
                    warn!(attempts = attempt, ?hints, %error, "retry budget exhausted");
                    return Err(RetryError::GaveUp {
                        attempts: attempt,
                        last_error: error,
                    });
                }
                Err(AttemptError::Retry(error)) => {
                    debug!(attempt, max_attempts, %error, "attempt failed, retrying");
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retrier(max: u32, critical: u32) -> SmartRetrier {
        SmartRetrier::new(RetryConfig::immediate(max).with_critical_max_attempts(critical))
    }

    #[test]
    fn success_after_retries() {
        let result: Result<u32, RetryError<String>> = retrier(3, 3).retry(
            |attempt| {
                if attempt < 3 {
                    Err(AttemptError::Retry(format!("fail {attempt}")))
                } else {
                    Ok(attempt)
                }
            },
            &[],
        );
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn exhaustion_gives_up() {
        let mut calls = 0;
        let result: Result<(), _> = retrier(2, 4).retry(
            |_| {
                calls += 1;
                Err(AttemptError::Retry("conflict"))
            },
            &[],
        );
        assert_eq!(
            result,
            Err(RetryError::GaveUp {
                attempts: 2,
                last_error: "conflict"
            })
        );
        assert_eq!(calls, 2);
    }

    #[test]
    fn critical_hint_raises_budget() {
        let retrier = retrier(2, 4);
        let result: Result<(), _> = retrier.retry(
            |_| Err(AttemptError::Retry("conflict")),
            &[RetryHint::Critical, RetryHint::TimeSensible],
        );
        assert_eq!(result.unwrap_err().attempts(), 4);
    }

    #[test]
    fn abort_stops_immediately() {
        let mut calls = 0;
        let result: Result<(), _> = retrier(5, 5).retry(
            |attempt| {
                calls += 1;
                if attempt == 2 {
                    Err(AttemptError::Abort("fatal"))
                } else {
                    Err(AttemptError::Retry("conflict"))
                }
            },
            &[],
        );
        let err = result.unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(err.attempts(), 2);
        assert_eq!(err.into_error(), "fatal");
        assert_eq!(calls, 2);
    }

    #[test]
    fn time_sensible_hint_caps_delay() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_secs(1))
            .with_time_sensible_max_delay(Duration::from_millis(5))
            .with_jitter(false);
        let retrier = SmartRetrier::new(config);

        assert_eq!(retrier.delay(1, &[RetryHint::TimeSensible]), Duration::ZERO);
        assert_eq!(
            retrier.delay(3, &[RetryHint::TimeSensible]),
            Duration::from_millis(5)
        );
        assert_eq!(retrier.delay(2, &[]), Duration::from_secs(1));
    }

    #[test]
    fn time_sensible_cap_holds_with_jitter() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_secs(1))
            .with_time_sensible_max_delay(Duration::from_millis(100));
        let retrier = SmartRetrier::new(config);

        let max = (0..200)
            .map(|_| retrier.delay(3, &[RetryHint::TimeSensible]))
            .max()
            .unwrap();
        assert!(max <= Duration::from_millis(100), "{max:?}");
    }

    #[test]
    fn zero_budget_still_runs_once() {
        let mut calls = 0;
        let _ = retrier(0, 0).retry(
            |_| {
                calls += 1;
                Err::<(), _>(AttemptError::Retry("conflict"))
            },
            &[],
        );
        assert_eq!(calls, 1);
    }
}
