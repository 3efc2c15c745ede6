//! Bounded retry with a constant delay between attempts.
//!
//! `RetryPolicy::run` drives an async operation until it succeeds, hits an
//! error that refuses retrying, or runs out of attempts. The delay is fixed:
//! no jitter and no growth. No sleep happens after the final attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Errors that know whether trying again could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// How a retried operation ended.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success(T),
    /// Every attempt failed with a retryable error. `last_error` is from the final one.
    Exhausted { attempts: u32, last_error: E },
    /// A non-retryable error stopped the sequence at `attempt` (1-based).
    Aborted { attempt: u32, error: E },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// A `max_attempts` of zero is treated as one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `operation` under this policy. The closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    debug!(attempt, "Operation succeeded");
                    return RetryOutcome::Success(value);
                }
                Err(error) if !error.is_retryable() => {
                    warn!(attempt, error = %error, "Operation failed with non-retryable error");
                    return RetryOutcome::Aborted { attempt, error };
                }
                Err(error) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "Attempt failed"
                    );
                    if attempt >= self.max_attempts {
                        return RetryOutcome::Exhausted {
                            attempts: attempt,
                            last_error: error,
                        };
                    }
                }
            }

            debug!(delay_ms = self.delay.as_millis() as u64, "Backing off before retry");
            tokio::time::sleep(self.delay).await;
            attempt += 1;
        }
    }
}
