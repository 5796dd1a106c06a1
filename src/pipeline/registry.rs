//! Per-target resilience state and per-tenant credentials
//!
//! Built once at startup and shared by reference with every pipeline call.

use crate::auth::AuthProvider;
use crate::breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};
use crate::error::{Error, Result};
use crate::http::{ApiRequest, LimiterSnapshot, RateLimiter, RateLimiterConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Breaker and rate limiter guarding one downstream target
#[derive(Debug)]
pub struct TargetGuard {
    /// Circuit breaker for the target
    pub breaker: CircuitBreaker,
    /// Token bucket for the target
    pub limiter: RateLimiter,
}

impl TargetGuard {
    /// Create the guard for `target`
    pub fn new(
        target: impl Into<String>,
        breaker: CircuitBreakerConfig,
        limiter: &RateLimiterConfig,
    ) -> Self {
        Self {
            breaker: CircuitBreaker::new(target, breaker),
            limiter: RateLimiter::new(limiter),
        }
    }

    /// Key this guard is registered under
    pub fn target(&self) -> &str {
        self.breaker.name()
    }
}

/// Read-only view of one target for health endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSnapshot {
    pub target: String,
    pub breaker: BreakerSnapshot,
    pub limiter: LimiterSnapshot,
}

/// Registry of targets and tenant credentials
#[derive(Debug)]
pub struct TargetRegistry {
    targets: HashMap<String, Arc<TargetGuard>>,
    default_target: Option<String>,
    default_auth: Arc<AuthProvider>,
    tenants: HashMap<String, Arc<AuthProvider>>,
}

impl TargetRegistry {
    /// Start building a registry
    pub fn builder() -> TargetRegistryBuilder {
        TargetRegistryBuilder::default()
    }

    /// Look up a target by key
    pub fn get(&self, target: &str) -> Result<Arc<TargetGuard>> {
        self.targets
            .get(target)
            .cloned()
            .ok_or_else(|| Error::UnknownTarget {
                target: target.to_string(),
            })
    }

    /// Route a request to its target
    ///
    /// An explicit target wins; otherwise an absolute URL is routed by host,
    /// and relative paths go to the default target.
    pub fn resolve(&self, request: &ApiRequest) -> Result<Arc<TargetGuard>> {
        if let Some(target) = &request.target {
            return self.get(target);
        }

        if request.path.starts_with("http://") || request.path.starts_with("https://") {
            let url = url::Url::parse(&request.path)?;
            let host = url.host_str().unwrap_or_default();
            return self.get(host);
        }

        match &self.default_target {
            Some(target) => self.get(target),
            None => Err(Error::UnknownTarget {
                target: request.path.clone(),
            }),
        }
    }

    /// Credential provider for a tenant, or the default provider
    pub fn auth(&self, tenant: Option<&str>) -> Result<Arc<AuthProvider>> {
        match tenant {
            None => Ok(Arc::clone(&self.default_auth)),
            Some(tenant) => self
                .tenants
                .get(tenant)
                .cloned()
                .ok_or_else(|| Error::auth(format!("No credentials configured for tenant '{tenant}'"))),
        }
    }

    /// Default target key
    pub fn default_target(&self) -> Option<&str> {
        self.default_target.as_deref()
    }

    /// Registered target keys, sorted
    pub fn targets(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Registered tenant names, sorted
    pub fn tenants(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.tenants.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Snapshot of every target, sorted by key
    pub fn snapshot(&self) -> Vec<TargetSnapshot> {
        self.targets()
            .into_iter()
            .filter_map(|key| self.targets.get(key))
            .map(|guard| TargetSnapshot {
                target: guard.target().to_string(),
                breaker: guard.breaker.snapshot(),
                limiter: guard.limiter.snapshot(),
            })
            .collect()
    }
}

/// Builder for [`TargetRegistry`]
#[derive(Debug, Default)]
pub struct TargetRegistryBuilder {
    targets: HashMap<String, Arc<TargetGuard>>,
    default_target: Option<String>,
    default_auth: Option<AuthProvider>,
    tenants: HashMap<String, Arc<AuthProvider>>,
}

impl TargetRegistryBuilder {
    /// Register a target
    #[must_use]
    pub fn target(
        mut self,
        name: impl Into<String>,
        breaker: CircuitBreakerConfig,
        limiter: RateLimiterConfig,
    ) -> Self {
        let name = name.into();
        let guard = TargetGuard::new(name.clone(), breaker, &limiter);
        self.targets.insert(name, Arc::new(guard));
        self
    }

    /// Register a target and make it the default
    #[must_use]
    pub fn default_target(
        self,
        name: impl Into<String>,
        breaker: CircuitBreakerConfig,
        limiter: RateLimiterConfig,
    ) -> Self {
        let name = name.into();
        let mut builder = self.target(name.clone(), breaker, limiter);
        builder.default_target = Some(name);
        builder
    }

    /// Set the provider used when a request names no tenant
    #[must_use]
    pub fn auth(mut self, provider: AuthProvider) -> Self {
        self.default_auth = Some(provider);
        self
    }

    /// Register a tenant's provider
    #[must_use]
    pub fn tenant(mut self, name: impl Into<String>, provider: AuthProvider) -> Self {
        self.tenants.insert(name.into(), Arc::new(provider));
        self
    }

    pub fn build(self) -> TargetRegistry {
        TargetRegistry {
            targets: self.targets,
            default_target: self.default_target,
            default_auth: Arc::new(self.default_auth.unwrap_or(AuthProvider::None)),
            tenants: self.tenants,
        }
    }
}
