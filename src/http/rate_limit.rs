//! Rate limiting implementation
//!
//! A token bucket refilled from the monotonic clock. Burst size is the bucket
//! `capacity`; steady-state throughput is `refill_rate_per_second`. Refill and
//! debit happen under one lock so each acquisition is atomic.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use crate::types::deadline_after;
use tokio::time::Instant;

/// Slack for floating point refill arithmetic
const EPSILON: f64 = 1e-9;

/// Shortest sleep between acquisition attempts
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Configuration for rate limiting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum number of tokens in the bucket (burst size)
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Tokens added per second
    #[serde(default = "default_refill_rate")]
    pub refill_rate_per_second: f64,
    /// Longest the pipeline waits for a token before giving up
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_capacity() -> u32 {
    10
}

fn default_refill_rate() -> f64 {
    10.0
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_rate_per_second: default_refill_rate(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl RateLimiterConfig {
    /// Create a new rate limiter config
    pub fn new(capacity: u32, refill_rate_per_second: f64) -> Self {
        Self {
            capacity,
            refill_rate_per_second,
            ..Self::default()
        }
    }

    /// Set the acquisition timeout
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Acquisition timeout as a duration
    pub fn acquire_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Why a blocking acquisition failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquireError {
    /// The request can never be admitted; this is a configuration error
    #[error("cost {cost} exceeds bucket capacity {capacity}")]
    CostExceedsCapacity { cost: u32, capacity: u32 },

    /// No token became available before the timeout
    #[error("no token available within {waited:?}")]
    TimedOut { waited: Duration },
}

/// Point-in-time view of a bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterSnapshot {
    /// Maximum tokens
    pub capacity: u32,
    /// Tokens available right now
    pub available_tokens: f64,
    /// Tokens added per second
    pub refill_rate_per_second: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, capacity: f64, rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).clamp(0.0, capacity);
        self.last_refill = now;
    }
}

/// Token bucket rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    capacity: u32,
    refill_rate: f64,
    acquire_timeout: Duration,
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config, starting full
    ///
    /// Capacity is raised to at least 1. A negative or NaN refill rate means
    /// the bucket never refills.
    pub fn new(config: &RateLimiterConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            capacity,
            refill_rate: config.refill_rate_per_second.max(0.0),
            acquire_timeout: config.acquire_timeout_duration(),
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            })),
        }
    }

    /// Try to take one token, returning immediately
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_n(1)
    }

    /// Try to take `cost` tokens, returning immediately
    ///
    /// A cost above capacity always fails.
    pub fn try_acquire_n(&self, cost: u32) -> bool {
        if cost > self.capacity {
            return false;
        }
        self.take_or_wait(cost, Instant::now()).is_ok()
    }

    /// Wait up to `timeout` for `cost` tokens
    pub async fn acquire(&self, cost: u32, timeout: Duration) -> Result<(), AcquireError> {
        self.acquire_until(cost, deadline_after(Instant::now(), timeout)).await
    }

    /// Wait until `deadline` for `cost` tokens
    ///
    /// Only the calling task is suspended; the bucket lock is never held
    /// across the sleep.
    pub async fn acquire_until(&self, cost: u32, deadline: Instant) -> Result<(), AcquireError> {
        if cost > self.capacity {
            return Err(AcquireError::CostExceedsCapacity {
                cost,
                capacity: self.capacity,
            });
        }

        let started = Instant::now();
        loop {
            let now = Instant::now();
            let wait = match self.take_or_wait(cost, now) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            let remaining = deadline.saturating_duration_since(now);
            if remaining.is_zero() {
                return Err(AcquireError::TimedOut {
                    waited: now.saturating_duration_since(started),
                });
            }

            let sleep_for = wait.map_or(remaining, |w| w.max(MIN_WAIT).min(remaining));
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Tokens available right now
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now(), f64::from(self.capacity), self.refill_rate);
        bucket.tokens
    }

    /// Bucket capacity
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Longest a caller should wait for a token
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Read-only view for health endpoints
    pub fn snapshot(&self) -> LimiterSnapshot {
        LimiterSnapshot {
            capacity: self.capacity,
            available_tokens: self.available_tokens(),
            refill_rate_per_second: self.refill_rate,
        }
    }

    /// Refill, then debit `cost` or report how long until it would fit.
    /// `Err(None)` means the bucket never refills in a representable time.
    fn take_or_wait(&self, cost: u32, now: Instant) -> Result<(), Option<Duration>> {
        let cost = f64::from(cost);
        let mut bucket = self.bucket.lock();
        bucket.refill(now, f64::from(self.capacity), self.refill_rate);

        if bucket.tokens + EPSILON >= cost {
            bucket.tokens = (bucket.tokens - cost).max(0.0);
            return Ok(());
        }

        if self.refill_rate <= 0.0 {
            return Err(None);
        }
        let deficit = cost - bucket.tokens;
        Err(Duration::try_from_secs_f64(deficit / self.refill_rate).ok())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .finish_non_exhaustive()
    }
}
