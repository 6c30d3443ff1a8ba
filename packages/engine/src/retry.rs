//! Bounded exponential backoff.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::time::Duration;

use treemirror_config::RetryConfig;

use crate::cancel::CancelToken;

/// Upper bound for any single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// How often, and how patiently, an operation is retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Growth factor per subsequent failure.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Delay to wait after `failures` consecutive failures (1-based).
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= MAX_DELAY.as_secs_f64() {
            return MAX_DELAY;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Whether another attempt is allowed after `attempts` attempts.
    #[must_use]
    pub const fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Run `op` until it succeeds, `should_retry` rejects the error, attempts run
    /// out, or `cancel` fires during a backoff.
    ///
    /// `op` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// * The last error, together with the number of attempts made
    pub fn run<T, E>(
        &self,
        cancel: &CancelToken,
        mut op: impl FnMut(u32) -> Result<T, E>,
        should_retry: impl Fn(&E) -> bool,
    ) -> Result<T, (E, u32)> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if should_retry(&e) && self.allows_retry(attempt) => {
                    let delay = self.delay_for(attempt);
                    log::debug!(
                        "Attempt {attempt}/{} failed, retrying in {delay:?}",
                        self.max_attempts
                    );
                    if !cancel.sleep(delay) {
                        return Err((e, attempt));
                    }
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay(), config.multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}
