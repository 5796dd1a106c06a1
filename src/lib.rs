// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_self)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]

//! # Resilient Connector
//!
//! A resilience core for outbound API calls. Every request runs through a
//! per-target rate limiter and circuit breaker, gets credentials applied,
//! is retried with jittered exponential backoff inside one deadline, and
//! has its response checked against a schema.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use resilient_connector::{load_config, ApiRequest, AnyJson, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let pipeline = load_config("connector.yaml")?.build_pipeline()?;
//!
//!     let user = pipeline
//!         .execute(ApiRequest::get("/users/42").tenant("acme"), &AnyJson)
//!         .await?;
//!     println!("{user}");
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        RequestPipeline                          │
//! │  resolve target → attempt loop → validate → typed result        │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌───────────┬───────────┬──────┴─────┬───────────┬───────────────┐
//! │ RateLimit │  Breaker  │    Auth    │   Retry   │    Schema     │
//! ├───────────┼───────────┼────────────┼───────────┼───────────────┤
//! │ Token     │ Closed    │ API Key    │ Backoff   │ JSON Schema   │
//! │ bucket    │ Open      │ Bearer     │ Jitter    │ Typed serde   │
//! │ per target│ HalfOpen  │ OAuth      │ RetryAfter│ JSON paths    │
//! └───────────┴───────────┴────────────┴───────────┴───────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types for the pipeline
pub mod error;

/// Common types and type aliases
pub mod types;

/// Credential providers
pub mod auth;

/// Transport and rate limiting
pub mod http;

/// Circuit breaker
pub mod breaker;

/// Retry policy
pub mod retry;

/// Response validation
pub mod schema;

/// Request pipeline and target registry
pub mod pipeline;

/// Connector configuration
pub mod config;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, ErrorKind, Result};
pub use types::*;

// Re-export commonly used types
pub use auth::{AuthConfig, AuthProvider};
pub use breaker::{BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{load_config, load_config_from_str, ConnectorConfig};
pub use http::{ApiRequest, RateLimiter, RateLimiterConfig, RawResponse, Transport};
pub use pipeline::{RequestPipeline, TargetRegistry};
pub use retry::{RetryConfig, RetryPolicy};
pub use schema::{AnyJson, JsonSchema, Schema, Typed};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
