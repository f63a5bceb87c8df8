//! Retry policy with capped exponential backoff
//!
//! [`RetryPolicy`] holds the attempt budget and backoff curve; [`with_retry_if`]
//! drives an async operation through it. A retryable-error predicate decides
//! whether a failure is worth another attempt, and a [`ShutdownListener`] can
//! abort the loop at any point, including in the middle of a backoff sleep.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::shutdown::ShutdownListener;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, first one included
    pub max_attempts: u32,

    /// Unit of the exponential curve: attempt `n` waits `base_delay * 2^n`
    pub base_delay: Duration,

    /// Upper bound for a single backoff sleep
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a custom attempt budget and the default curve
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Create a policy with custom delays
    pub fn with_delays(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Number of attempts actually made; a zero budget still tries once
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Sleep before attempt `attempt` (0-based): `min(base * 2^attempt, max)`, none before the first
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Sum of every backoff sleep when all attempts fail
    pub fn total_backoff(&self) -> Duration {
        (1..self.attempts()).map(|attempt| self.backoff(attempt)).sum()
    }
}

/// Why [`with_retry_if`] gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Shutdown was signalled before an attempt succeeded
    Cancelled,

    /// The predicate refused to retry this error
    Rejected { attempt: u32, error: E },

    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
}

/// Execute an operation under a retry policy, retrying only when `should_retry` agrees
///
/// The operation receives the 0-based attempt number. Shutdown is observed
/// before each attempt, during the attempt itself and during backoff sleeps.
///
/// # Example
///
/// ```no_run
/// use subkeeper::shutdown::Shutdown;
/// use subkeeper::utils::retry::{with_retry_if, RetryPolicy};
///
/// #[tokio::main]
/// async fn main() {
///     let shutdown = Shutdown::new();
///     let mut listener = shutdown.listener();
///     let result = with_retry_if(
///         &RetryPolicy::new(3),
///         &mut listener,
///         |_attempt| async { Err::<(), _>("network down") },
///         |_e| true,
///     )
///     .await;
///     assert!(result.is_err());
/// }
/// ```
pub async fn with_retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    shutdown: &mut ShutdownListener,
    mut operation: F,
    should_retry: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = policy.backoff(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying operation after delay"
            );
            tokio::select! {
                _ = shutdown.recv() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if shutdown.is_shutdown() {
            return Err(RetryError::Cancelled);
        }

        let result = tokio::select! {
            _ = shutdown.recv() => return Err(RetryError::Cancelled),
            result = operation(attempt) => result,
        };

        match result {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if !should_retry(&error) => {
                warn!(attempt = attempt, error = %error, "Non-retryable error encountered");
                return Err(RetryError::Rejected {
                    attempt: attempt + 1,
                    error,
                });
            }
            Err(error) => {
                attempt += 1;
                if attempt >= attempts {
                    warn!(attempts = attempts, error = %error, "Retry budget exhausted");
                    return Err(RetryError::Exhausted {
                        attempts,
                        last: error,
                    });
                }
                warn!(
                    attempt = attempt,
                    max_attempts = attempts,
                    error = %error,
                    "Operation failed, will retry"
                );
            }
        }
    }
}
