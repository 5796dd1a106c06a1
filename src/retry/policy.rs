//! Retry policy implementation

use crate::error::Error;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on the computed backoff (before jitter)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor range is `[1 - jitter_fraction, 1 + jitter_fraction]`
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    /// Total attempts allowed, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Server statuses treated as transient
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter_fraction() -> f64 {
    0.2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_fraction: default_jitter_fraction(),
            max_attempts: default_max_attempts(),
            retry_statuses: default_retry_statuses(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base and maximum delays.
    #[must_use]
    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Sets the jitter fraction.
    #[must_use]
    pub fn jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    /// Sets the maximum number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Creates a configuration with no retries.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Retry policy with exponential backoff and jitter
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a new retry policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Policy configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Maximum attempts per logical request.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Decide whether attempt `attempt` (1-based) failing with `error` is retried.
    ///
    /// Returns the delay to wait before the next attempt, or `None` when the
    /// error is permanent or the attempt budget is spent.
    pub fn should_retry(&self, attempt: u32, error: &Error) -> Option<Duration> {
        if attempt >= self.config.max_attempts || !self.is_transient(error) {
            return None;
        }

        let delay = self.backoff(attempt);
        Some(match error.retry_after() {
            Some(mandated) => delay.max(mandated),
            None => delay,
        })
    }

    /// Whether an error is worth another attempt.
    ///
    /// Only transport failures and configured server statuses qualify; client,
    /// auth, validation, circuit and deadline errors never do.
    pub fn is_transient(&self, error: &Error) -> bool {
        match error {
            Error::Transport { .. } => true,
            Error::Server { status, .. } => self.config.retry_statuses.contains(status),
            _ => false,
        }
    }

    /// Backoff for `attempt` before jitter: `min(max, base * 2^(attempt - 1))`.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.config.base_delay_ms);
        let max = Duration::from_millis(self.config.max_delay_ms);
        let exponent = attempt.saturating_sub(1);

        2u32.checked_pow(exponent)
            .and_then(|factor| base.checked_mul(factor))
            .map_or(max, |delay| delay.min(max))
    }

    /// Jittered backoff for `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_backoff(attempt);
        let jitter = self.config.jitter_fraction.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }

        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        delay.mul_f64(factor)
    }
}
