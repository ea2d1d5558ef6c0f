//! Caller-side retry policy for conflicting appends.
//!
//! Appends never retry on their own. A caller that wants read-and-retry
//! behavior passes a [`RetryPolicy`] to
//! [`EventStore::append_with_retry`](crate::EventStore::append_with_retry),
//! which retries only conflict errors (see [`Error::is_conflict`](crate::Error::is_conflict))
//! and sleeps with capped exponential backoff between attempts.

use std::time::Duration;

/// How many times to attempt a conflicting append and how long to wait between
/// attempts.
///
/// # Environment Variables
///
/// | Variable                          | Default | Description                          |
/// |-----------------------------------|---------|--------------------------------------|
/// | `EVENTSLICE_RETRY_MAX_ATTEMPTS`   | `3`     | Total attempts, including the first  |
/// | `EVENTSLICE_RETRY_BASE_DELAY_MS`  | `10`    | Delay after the first conflict       |
/// | `EVENTSLICE_RETRY_MAX_DELAY_MS`   | `100`   | Upper bound on any single delay      |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 count as 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles with each further attempt.
    pub base_delay: Duration,
    /// Upper bound on a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the total number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay after the first conflict.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the upper bound on a single delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Attempts allowed, never less than one.
    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Parse a policy from environment variables, falling back to defaults for
    /// unset variables.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` naming the variable if a set variable is not a
    /// valid integer.
    pub fn from_env() -> Result<RetryPolicy, String> {
        let defaults = RetryPolicy::default();

        let max_attempts = match std::env::var("EVENTSLICE_RETRY_MAX_ATTEMPTS") {
            Ok(val) => val
                .parse::<u32>()
                .map_err(|e| format!("EVENTSLICE_RETRY_MAX_ATTEMPTS is not a valid u32: {e}"))?,
            Err(_) => defaults.max_attempts,
        };
        let base_delay = env_millis("EVENTSLICE_RETRY_BASE_DELAY_MS")?.unwrap_or(defaults.base_delay);
        let max_delay = env_millis("EVENTSLICE_RETRY_MAX_DELAY_MS")?.unwrap_or(defaults.max_delay);

        Ok(RetryPolicy {
            max_attempts,
            base_delay,
            max_delay,
        })
    }
}

fn env_millis(var: &str) -> Result<Option<Duration>, String> {
    match std::env::var(var) {
        Ok(val) => val
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| format!("{var} is not a valid u64: {e}")),
        Err(_) => Ok(None),
    }
}
