//! Circuit breaker state machine
//!
//! One breaker guards one downstream target and is shared by every request to
//! it. All state lives behind a single mutex, so transitions are linearizable
//! and the HalfOpen trial permit is handed out at most once per Open period.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected until the reset timeout elapses
    Open,
    /// One trial request decides whether to close or re-open
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures within the rolling window that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Number of most recent outcomes considered while closed
    #[serde(default = "default_rolling_window")]
    pub rolling_window: u32,
    /// Successful trials needed in HalfOpen before closing
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Time spent open before a trial request is allowed
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    /// Treat deadline expiry during dispatch as a breaker failure
    #[serde(default)]
    pub count_deadline_as_failure: bool,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_rolling_window() -> u32 {
    10
}

fn default_success_threshold() -> u32 {
    1
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            rolling_window: default_rolling_window(),
            success_threshold: default_success_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            count_deadline_as_failure: false,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the rolling window size.
    #[must_use]
    pub fn rolling_window(mut self, window: u32) -> Self {
        self.rolling_window = window;
        self
    }

    /// Sets the number of successful trials needed to close.
    #[must_use]
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Sets the reset timeout.
    #[must_use]
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Reset timeout as a duration.
    pub fn reset_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Failures in the rolling window
    pub failure_count: u32,
    /// Successful trials since entering HalfOpen
    pub success_count: u32,
    /// Milliseconds since the circuit last opened
    pub open_for_ms: Option<u64>,
    /// Milliseconds since the last recorded failure
    pub last_failure_ms_ago: Option<u64>,
}

/// Admission handed out by [`CircuitBreaker::allow`]
///
/// The outcome of the admitted attempt must be reported with this permit.
/// Outcomes whose permit predates the latest state transition are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPermit {
    generation: u64,
    trial: bool,
}

impl BreakerPermit {
    /// Whether this permit is the HalfOpen trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Bumped on every state transition
    generation: u64,
    /// Recent outcomes while closed, `true` for failure
    window: VecDeque<bool>,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
    /// Armed on every transition to Open, consumed by the trial it admits
    trial_permit: bool,
}

impl BreakerInner {
    fn closed(generation: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            generation,
            window: VecDeque::new(),
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            opened_at: None,
            trial_permit: false,
        }
    }

    fn record(&mut self, failed: bool, window: usize) {
        self.window.push_back(failed);
        if failed {
            self.failure_count += 1;
        }
        while self.window.len() > window {
            if self.window.pop_front() == Some(true) {
                self.failure_count -= 1;
            }
        }
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.generation = self.generation.wrapping_add(1);
    }

    fn trip(&mut self, now: Instant) {
        self.transition(CircuitState::Open);
        self.opened_at = Some(now);
        self.success_count = 0;
        self.trial_permit = true;
    }

    fn permit(&self, trial: bool) -> BreakerPermit {
        BreakerPermit {
            generation: self.generation,
            trial,
        }
    }

    fn is_current(&self, permit: BreakerPermit) -> bool {
        permit.generation == self.generation
    }
}

/// Circuit breaker for protecting against cascading failures
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker for the named target.
    ///
    /// Thresholds are raised to at least 1 and the rolling window to at least
    /// `failure_threshold`, so the breaker can always trip.
    pub fn new(name: impl Into<String>, mut config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        config.failure_threshold = config.failure_threshold.max(1);
        config.success_threshold = config.success_threshold.max(1);
        if config.rolling_window < config.failure_threshold {
            debug!(
                target_name = %name,
                rolling_window = config.rolling_window,
                failure_threshold = config.failure_threshold,
                "Raising rolling window to the failure threshold"
            );
            config.rolling_window = config.failure_threshold;
        }

        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner::closed(0)),
        }
    }

    /// Target this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Asks for admission.
    ///
    /// In Open, the first call after the reset timeout moves the breaker to
    /// HalfOpen and receives the single trial permit; every other caller is
    /// refused until the trial resolves.
    pub fn allow(&self) -> Option<BreakerPermit> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(inner.permit(false)),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map_or(Duration::MAX, |at| Instant::now().saturating_duration_since(at));
                if elapsed >= self.config.reset_timeout_duration() && inner.trial_permit {
                    inner.transition(CircuitState::HalfOpen);
                    inner.success_count = 0;
                    inner.trial_permit = false;
                    info!(target_name = %self.name, "Circuit breaker half-open, issuing trial permit");
                    Some(inner.permit(true))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                // Only re-armed after a successful trial below the success threshold
                if inner.trial_permit {
                    inner.trial_permit = false;
                    Some(inner.permit(true))
                } else {
                    None
                }
            }
        }
    }

    /// Records a successful attempt.
    pub fn on_success(&self, permit: BreakerPermit) {
        let mut inner = self.inner.lock();
        if !inner.is_current(permit) {
            debug!(target_name = %self.name, "Ignoring success from an earlier breaker state");
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                let window = self.config.rolling_window as usize;
                inner.record(false, window);
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    info!(target_name = %self.name, "Circuit breaker closing after successful trial");
                    let generation = inner.generation.wrapping_add(1);
                    *inner = BreakerInner::closed(generation);
                } else {
                    inner.trial_permit = true;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed attempt.
    pub fn on_failure(&self, permit: BreakerPermit) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if !inner.is_current(permit) {
            debug!(target_name = %self.name, "Ignoring failure from an earlier breaker state");
            return;
        }
        inner.last_failure_time = Some(now);
        match inner.state {
            CircuitState::Closed => {
                let window = self.config.rolling_window as usize;
                inner.record(true, window);
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        target_name = %self.name,
                        failures = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker opening"
                    );
                    inner.trip(now);
                }
            }
            CircuitState::HalfOpen => {
                warn!(target_name = %self.name, "Circuit breaker re-opening after failed trial");
                inner.trip(now);
            }
            CircuitState::Open => {}
        }
    }

    /// Gives back a permit whose attempt ended without an outcome.
    ///
    /// A released trial returns the breaker to Open with its original
    /// `opened_at`, so the next `allow()` can issue a fresh trial straight
    /// away. Releasing a Closed permit records nothing.
    pub fn release(&self, permit: BreakerPermit) {
        let mut inner = self.inner.lock();
        if permit.trial && inner.is_current(permit) && inner.state == CircuitState::HalfOpen {
            debug!(target_name = %self.name, "Trial attempt abandoned, re-arming permit");
            inner.transition(CircuitState::Open);
            inner.trial_permit = true;
        }
    }

    /// Resets the circuit breaker to closed state.
    ///
    /// Permits issued before the reset no longer count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let generation = inner.generation.wrapping_add(1);
        *inner = BreakerInner::closed(generation);
    }

    /// Returns the number of failures in the rolling window.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Read-only view for health endpoints.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let inner = self.inner.lock();
        let since = |at: Option<Instant>| at.map(|t| now.saturating_duration_since(t).as_millis() as u64);
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            open_for_ms: if inner.state == CircuitState::Closed {
                None
            } else {
                since(inner.opened_at)
            },
            last_failure_ms_ago: since(inner.last_failure_time),
        }
    }
}
