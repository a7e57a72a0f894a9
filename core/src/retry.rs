//! Exponential backoff around fallible operations.

use std::time::Duration;

use crate::error::{GeocachingError, Result};

/// How often, and how patiently, one class of error is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Transport failures: three attempts, starting at one second.
    pub fn connection() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(15 * 60),
        }
    }

    /// Server throttling: six attempts, starting at a one minute cool-down.
    pub fn rate_limit() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(60),
            multiplier: 2,
            max_delay: Duration::from_secs(15 * 60),
        }
    }

    /// Same attempt budget, no waiting. Used by tests and mock setups.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            multiplier: 2,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or `policy.max_attempts` attempts have been made. The last error
/// is returned on exhaustion.
pub fn with_retry<T, F, P>(
    policy: &BackoffPolicy,
    should_retry: P,
    sleep: &dyn Fn(Duration),
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
    P: Fn(&GeocachingError) -> bool,
{
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if should_retry(&err) && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying Geocaching API request"
                );
                sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
