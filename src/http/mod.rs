//! HTTP module
//!
//! Transport plumbing and admission control for outbound requests.
//!
//! # Features
//!
//! - **Transport**: Pluggable `Transport` trait with a reqwest implementation
//! - **Rate Limiting**: Monotonic token bucket with blocking and non-blocking acquisition
//! - **Request/Response**: `ApiRequest` builder and `RawResponse` with `Retry-After` parsing

mod client;
mod rate_limit;
mod request;

pub use client::{ReqwestTransport, Transport, TransportConfig, TransportConfigBuilder};
pub use rate_limit::{AcquireError, LimiterSnapshot, RateLimiter, RateLimiterConfig};
pub use request::{parse_retry_after, ApiRequest, RawResponse, MAX_RETRY_AFTER};
