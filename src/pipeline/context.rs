//! Per-request context

use crate::error::Error;
use crate::types::deadline_after;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// State owned by one in-flight logical request
///
/// The correlation id is generated once and reused by every attempt.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id sent with every attempt
    pub correlation_id: String,
    /// Attempt number, 1-based once the first attempt starts
    pub attempt: u32,
    /// Instant after which no further work is started
    pub deadline: Instant,
    /// Target key the request is routed to
    pub target: String,
    started: Instant,
}

impl RequestContext {
    /// Create a context with a fresh correlation id
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            attempt: 0,
            deadline: deadline_after(started, timeout),
            target: target.into(),
            started,
        }
    }

    /// Use a caller-supplied correlation id
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Start the next attempt and return its number
    pub fn next_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Time since the request started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has been reached
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Error returned when the deadline is hit
    pub fn deadline_exceeded(&self) -> Error {
        Error::DeadlineExceeded {
            elapsed_ms: self.elapsed().as_millis() as u64,
        }
    }
}
