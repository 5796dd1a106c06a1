//! Connector configuration
//!
//! Connectors are described in YAML. `${VAR}` references are replaced from the
//! environment before parsing so secrets stay out of config files.
//!
//! ```yaml
//! name: github
//! base_url: https://api.github.com
//! http:
//!   request_timeout_ms: 10000
//! resilience:
//!   circuit_breaker:
//!     failure_threshold: 5
//!   rate_limit:
//!     capacity: 20
//!     refill_rate_per_second: 5
//!   retry:
//!     max_attempts: 4
//! auth:
//!   type: bearer
//!   token: ${GITHUB_TOKEN}
//! ```

use crate::auth::{AuthConfig, AuthProvider};
use crate::breaker::CircuitBreakerConfig;
use crate::error::{Error, Result};
use crate::http::{RateLimiterConfig, ReqwestTransport, TransportConfig};
use crate::pipeline::{PipelineConfig, RequestPipeline, TargetRegistry};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::types::StringMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const ENV_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}";

// ============================================================================
// Top-Level Connector Config
// ============================================================================

/// Complete connector configuration loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector name, used in logs
    pub name: String,

    /// Base URL for relative request paths; its host is the default target
    pub base_url: String,

    /// HTTP client and pipeline settings
    #[serde(default)]
    pub http: HttpSettings,

    /// Resilience defaults applied to every target
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Additional targets keyed by host, with optional overrides
    #[serde(default)]
    pub targets: BTreeMap<String, TargetOverrides>,

    /// Credential used when a request names no tenant
    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-tenant credentials
    #[serde(default)]
    pub tenants: BTreeMap<String, AuthConfig>,
}

// ============================================================================
// HTTP Settings
// ============================================================================

/// HTTP client and pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Deadline, correlation header and re-auth behaviour
    #[serde(flatten)]
    pub pipeline: PipelineConfig,

    /// Connection establishment timeout
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// User agent override
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Headers sent with every request
    #[serde(default)]
    pub headers: StringMap,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            user_agent: None,
            headers: StringMap::new(),
        }
    }
}

// ============================================================================
// Resilience
// ============================================================================

/// Breaker, rate limit and retry settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimiterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Per-target replacements for the resilience defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetOverrides {
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default)]
    pub rate_limit: Option<RateLimiterConfig>,
}

impl ConnectorConfig {
    /// Host of `base_url`, used as the default target key
    pub fn default_target(&self) -> Result<String> {
        let url = url::Url::parse(&self.base_url)?;
        url.host_str()
            .map(str::to_string)
            .ok_or_else(|| Error::invalid_value("base_url", "must include a host"))
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("Connector name cannot be empty"));
        }
        self.default_target()?;

        if self.http.pipeline.request_timeout_ms == 0 {
            return Err(Error::invalid_value("http.request_timeout_ms", "must be greater than 0"));
        }
        if reqwest::header::HeaderName::from_bytes(self.http.pipeline.correlation_header.as_bytes()).is_err() {
            return Err(Error::invalid_value(
                "http.correlation_header",
                format!("'{}' is not a valid header name", self.http.pipeline.correlation_header),
            ));
        }

        validate_breaker("resilience.circuit_breaker", &self.resilience.circuit_breaker)?;
        validate_limiter("resilience.rate_limit", &self.resilience.rate_limit)?;
        validate_retry("resilience.retry", &self.resilience.retry)?;

        for (target, overrides) in &self.targets {
            if target.trim().is_empty() {
                return Err(Error::config("Target names cannot be empty"));
            }
            if let Some(breaker) = &overrides.circuit_breaker {
                validate_breaker(&format!("targets.{target}.circuit_breaker"), breaker)?;
            }
            if let Some(limiter) = &overrides.rate_limit {
                validate_limiter(&format!("targets.{target}.rate_limit"), limiter)?;
            }
        }

        Ok(())
    }

    /// Transport settings derived from the HTTP section
    pub fn transport_config(&self) -> TransportConfig {
        let mut builder = TransportConfig::builder()
            .base_url(self.base_url.clone())
            .connect_timeout(Duration::from_millis(self.http.connect_timeout_ms));
        if let Some(agent) = &self.http.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        for (key, value) in &self.http.headers {
            builder = builder.header(key.clone(), value.clone());
        }
        builder.build()
    }

    /// Build the target registry: the default target, every configured
    /// target, the default credential and one provider per tenant
    pub fn build_registry(&self, http_client: &reqwest::Client) -> Result<TargetRegistry> {
        let defaults = &self.resilience;
        let mut builder = TargetRegistry::builder().default_target(
            self.default_target()?,
            defaults.circuit_breaker.clone(),
            defaults.rate_limit.clone(),
        );

        for (target, overrides) in &self.targets {
            builder = builder.target(
                target.clone(),
                overrides
                    .circuit_breaker
                    .clone()
                    .unwrap_or_else(|| defaults.circuit_breaker.clone()),
                overrides
                    .rate_limit
                    .clone()
                    .unwrap_or_else(|| defaults.rate_limit.clone()),
            );
        }

        builder = builder.auth(AuthProvider::from_config(&self.auth, http_client)?);
        for (tenant, auth) in &self.tenants {
            builder = builder.tenant(tenant.clone(), AuthProvider::from_config(auth, http_client)?);
        }

        Ok(builder.build())
    }

    /// Build a ready-to-use pipeline over the reqwest transport
    pub fn build_pipeline(&self) -> Result<RequestPipeline> {
        let transport = ReqwestTransport::with_config(self.transport_config())?;
        let registry = self.build_registry(transport.inner())?;

        Ok(RequestPipeline::new(Arc::new(registry), Arc::new(transport))
            .with_retry(RetryPolicy::new(self.resilience.retry.clone()))
            .with_config(self.http.pipeline.clone()))
    }
}

fn validate_breaker(field: &str, config: &CircuitBreakerConfig) -> Result<()> {
    if config.failure_threshold == 0 {
        return Err(Error::invalid_value(format!("{field}.failure_threshold"), "must be at least 1"));
    }
    if config.rolling_window < config.failure_threshold {
        return Err(Error::invalid_value(
            format!("{field}.rolling_window"),
            "must be at least failure_threshold",
        ));
    }
    if config.success_threshold == 0 {
        return Err(Error::invalid_value(format!("{field}.success_threshold"), "must be at least 1"));
    }
    Ok(())
}

fn validate_limiter(field: &str, config: &RateLimiterConfig) -> Result<()> {
    if config.capacity == 0 {
        return Err(Error::invalid_value(format!("{field}.capacity"), "must be at least 1"));
    }
    if !config.refill_rate_per_second.is_finite() || config.refill_rate_per_second <= 0.0 {
        return Err(Error::invalid_value(
            format!("{field}.refill_rate_per_second"),
            "must be a positive number",
        ));
    }
    Ok(())
}

fn validate_retry(field: &str, config: &RetryConfig) -> Result<()> {
    if config.max_attempts == 0 {
        return Err(Error::invalid_value(format!("{field}.max_attempts"), "must be at least 1"));
    }
    if !(0.0..=1.0).contains(&config.jitter_fraction) {
        return Err(Error::invalid_value(
            format!("{field}.jitter_fraction"),
            "must be between 0 and 1",
        ));
    }
    if config.base_delay_ms > config.max_delay_ms {
        return Err(Error::invalid_value(
            format!("{field}.base_delay_ms"),
            "must not exceed max_delay_ms",
        ));
    }
    Ok(())
}

// ============================================================================
// Loading
// ============================================================================

/// Load and validate a connector config file
pub fn load_config(path: impl AsRef<Path>) -> Result<ConnectorConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        Error::config(format!("Failed to read config file '{}': {e}", path.display()))
    })?;
    load_config_from_str(&content)
}

/// Load and validate a connector config from YAML text
pub fn load_config_from_str(yaml: &str) -> Result<ConnectorConfig> {
    let expanded = interpolate_env(yaml)?;
    let config: ConnectorConfig = serde_yaml::from_str(&expanded)?;
    config.validate()?;
    Ok(config)
}

/// Replace `${VAR}` and `${VAR:-default}` with environment values
pub fn interpolate_env(text: &str) -> Result<String> {
    let pattern = Regex::new(ENV_PATTERN).map_err(|e| Error::Other(e.to_string()))?;
    let mut missing = Vec::new();

    let expanded = pattern.replace_all(text, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match (std::env::var(name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(Error::config(format!(
            "Missing environment variables: {}",
            missing.join(", ")
        )));
    }
    Ok(expanded.into_owned())
}
