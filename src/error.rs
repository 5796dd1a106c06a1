//! Error types for the connector pipeline
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.
//!
//! The pipeline taxonomy (transport, server, client, circuit open, auth,
//! validation, deadline) drives both retry and circuit breaker decisions, see
//! [`Error::is_retryable`] and [`Error::is_breaker_failure`].

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The main error type for the connector pipeline
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Pipeline Errors
    // ============================================================================
    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("Server error {status}: {body}")]
    Server {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    #[error("Client error {status}: {body}")]
    Client { status: u16, body: String },

    #[error("Circuit open for target '{target}'")]
    CircuitOpen { target: String },

    #[error("Rate limit wait for target '{target}' exhausted after {waited_ms}ms")]
    RateLimitExceeded { target: String, waited_ms: u64 },

    #[error("Deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    #[error("Unknown target '{target}'")]
    UnknownTarget { target: String },

    // ============================================================================
    // Authentication Errors
    // ============================================================================
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Token refresh failed: {message}")]
    TokenRefresh { message: String },

    // ============================================================================
    // Validation Errors
    // ============================================================================
    #[error("Response validation failed: {0}")]
    Validation(#[from] ValidationError),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// How a transport-level failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not establish a connection
    Connect,
    /// The request did not complete in time
    Timeout,
    /// Any other I/O or protocol failure
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Connect => write!(f, "connect"),
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Failure reported by a [`Transport`](crate::http::Transport) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    /// Failure kind
    pub kind: TransportErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl TransportError {
    /// Create a transport error
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a connect error
    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport {
            kind: err.kind,
            message: err.message,
        }
    }
}

/// A response did not match the expected schema
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("at '{path}': {message}")]
pub struct ValidationError {
    /// JSON path of the offending value (`$` for the root)
    pub path: String,
    /// What was wrong
    pub message: String,
}

impl ValidationError {
    /// Create a validation error
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Coarse classification of an [`Error`], used in logs and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Server,
    Client,
    CircuitOpen,
    RateLimitExceeded,
    DeadlineExceeded,
    Auth,
    Validation,
    Config,
    Other,
}

impl ErrorKind {
    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Server => "server",
            ErrorKind::Client => "client",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::Config => "config",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a token refresh error
    pub fn token_refresh(message: impl Into<String>) -> Self {
        Self::TokenRefresh {
            message: message.into(),
        }
    }

    /// Create a server error without a `Retry-After` hint
    pub fn server(status: u16, body: impl Into<String>) -> Self {
        Self::Server {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    /// Create a client error
    pub fn client(status: u16, body: impl Into<String>) -> Self {
        Self::Client {
            status,
            body: body.into(),
        }
    }

    /// Classify an HTTP error status into a server or client error
    pub fn from_status(status: u16, body: impl Into<String>, retry_after: Option<Duration>) -> Self {
        if status == 429 || status >= 500 {
            Self::Server {
                status,
                body: body.into(),
                retry_after,
            }
        } else {
            Self::client(status, body)
        }
    }

    /// Coarse classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Server { .. } => ErrorKind::Server,
            Error::Client { .. } => ErrorKind::Client,
            Error::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Error::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Error::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Error::Auth { .. } | Error::TokenRefresh { .. } => ErrorKind::Auth,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Config { .. }
            | Error::InvalidConfigValue { .. }
            | Error::YamlParse(_)
            | Error::UnknownTarget { .. }
            | Error::InvalidUrl(_) => ErrorKind::Config,
            Error::JsonParse(_) | Error::Io(_) | Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Check if this error is transient under the default classification
    ///
    /// The pipeline consults [`RetryPolicy`](crate::retry::RetryPolicy), which
    /// may be configured with a different set of retryable statuses.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::Server { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Check if this error counts as a failure for circuit breaker purposes
    ///
    /// Network errors, timeouts, 5xx and 429 count; other 4xx reached the
    /// service and do not.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Server { .. })
    }

    /// Check if this is an authentication failure
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth { .. } | Error::TokenRefresh { .. })
    }

    /// Server-mandated delay carried by a 429/503 response
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Server { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status associated with this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Server { status, .. } | Error::Client { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Check if an HTTP status code is retryable under the default classification
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}
