//! Circuit breaker module
//!
//! Tri-state failure guard shared by all requests to one downstream target.
//!
//! - **Closed**: requests flow; failures are counted over a rolling window of
//!   the most recent outcomes
//! - **Open**: requests fail fast until the reset timeout elapses
//! - **HalfOpen**: exactly one trial permit is issued; its outcome closes or
//!   re-opens the circuit
//!
//! Outcomes are reported with the [`BreakerPermit`] returned by `allow()`.
//! Attempts admitted before a transition cannot change the new state.

mod circuit;

pub use circuit::{
    BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
