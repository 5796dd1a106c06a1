//! Retry policy
//!
//! Decides whether a failed attempt is retried and how long to wait first:
//! exponential backoff capped at `max_delay`, multiplied by a uniform jitter
//! factor, and never shorter than a server-mandated `Retry-After`.

mod policy;

pub use policy::{RetryConfig, RetryPolicy};

#[cfg(test)]
mod tests;
