//! Request pipeline
//!
//! One logical request runs as a loop of attempts inside the caller's task.
//! Each attempt takes a rate token, asks the breaker for admission, applies
//! credentials and dispatches through the [`Transport`]. The outcome is
//! classified, fed back to the breaker exactly once, and handed to the
//! [`RetryPolicy`]. Successful responses are validated once at the end.

use super::context::RequestContext;
use super::registry::{TargetGuard, TargetRegistry, TargetSnapshot};
use crate::auth::AuthProvider;
use crate::breaker::BreakerPermit;
use crate::error::{Error, Result, TransportErrorKind};
use crate::http::{AcquireError, ApiRequest, RawResponse, Transport};
use crate::retry::RetryPolicy;
use crate::schema::{validate, Schema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Pipeline-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Deadline for a logical request when the request sets none
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Header carrying the correlation id
    #[serde(default = "default_correlation_header")]
    pub correlation_header: String,
    /// On a 401, invalidate an OAuth token and try once more with a fresh one
    #[serde(default = "default_reauth_on_unauthorized")]
    pub reauth_on_unauthorized: bool,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_correlation_header() -> String {
    "X-Correlation-ID".to_string()
}

fn default_reauth_on_unauthorized() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            correlation_header: default_correlation_header(),
            reauth_on_unauthorized: default_reauth_on_unauthorized(),
        }
    }
}

impl PipelineConfig {
    /// Default request deadline as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Executes requests against registered targets
pub struct RequestPipeline {
    registry: Arc<TargetRegistry>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    config: PipelineConfig,
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("targets", &self.registry.targets())
            .field("retry", &self.retry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RequestPipeline {
    /// Create a pipeline with the default retry policy
    pub fn new(registry: Arc<TargetRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            retry: RetryPolicy::default(),
            config: PipelineConfig::default(),
        }
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set pipeline settings
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Shared target registry
    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Pipeline settings
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Breaker and limiter state for every target
    pub fn snapshot(&self) -> Vec<TargetSnapshot> {
        self.registry.snapshot()
    }

    /// Execute a request and validate the response against `schema`
    pub async fn execute<S>(&self, request: ApiRequest, schema: &S) -> Result<S::Output>
    where
        S: Schema + ?Sized,
    {
        let raw = self.execute_raw(request).await?;
        validate(&raw, schema).map_err(|err| {
            warn!(path = %err.path, error = %err.message, "Response failed validation");
            Error::from(err)
        })
    }

    /// Execute a request and return the raw successful response
    pub async fn execute_raw(&self, request: ApiRequest) -> Result<RawResponse> {
        let guard = self.registry.resolve(&request)?;
        let auth = self.registry.auth(request.tenant.as_deref())?;

        let timeout = request.timeout.unwrap_or_else(|| self.config.request_timeout());
        let mut ctx = RequestContext::new(guard.target(), timeout);
        if let Some(id) = request.header_value(&self.config.correlation_header) {
            ctx = ctx.with_correlation_id(id);
        }

        let span = info_span!(
            "request",
            correlation_id = %ctx.correlation_id,
            target = %ctx.target,
            method = %request.method,
            path = %request.path,
        );

        self.run(request, &mut ctx, &guard, &auth)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        request: ApiRequest,
        ctx: &mut RequestContext,
        guard: &TargetGuard,
        auth: &AuthProvider,
    ) -> Result<RawResponse> {
        let request = request.header(self.config.correlation_header.clone(), ctx.correlation_id.clone());
        let mut reauthenticated = false;

        loop {
            let attempt = ctx.next_attempt();
            let err = match self.attempt(&request, ctx, guard, auth).await {
                Ok(raw) => {
                    debug!(
                        attempt,
                        status = raw.status,
                        elapsed_ms = ctx.elapsed().as_millis() as u64,
                        "Request succeeded"
                    );
                    return Ok(raw);
                }
                Err(err) => err,
            };

            if self.should_reauthenticate(&err, auth, reauthenticated) {
                info!(attempt, "Unauthorized response, refreshing credential");
                auth.invalidate();
                reauthenticated = true;
                continue;
            }

            let Some(delay) = self.retry.should_retry(attempt, &err) else {
                warn!(attempt, kind = %err.kind(), error = %err, "Request failed");
                return Err(err);
            };

            if delay >= ctx.remaining() {
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retry delay runs past the deadline"
                );
                return Err(ctx.deadline_exceeded());
            }

            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                status = err.status(),
                error = %err,
                "Retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One attempt: rate token, breaker admission, credentials, dispatch.
    async fn attempt(
        &self,
        request: &ApiRequest,
        ctx: &RequestContext,
        guard: &TargetGuard,
        auth: &AuthProvider,
    ) -> Result<RawResponse> {
        self.acquire_token(ctx, guard).await?;

        let Some(permit) = guard.breaker.allow() else {
            debug!(target_name = %ctx.target, "Circuit open, failing fast");
            return Err(Error::CircuitOpen {
                target: ctx.target.clone(),
            });
        };

        let authorized = match tokio::time::timeout_at(ctx.deadline, auth.authorize(request.clone())).await {
            Ok(Ok(authorized)) => authorized,
            Ok(Err(err)) => {
                guard.breaker.release(permit);
                return Err(err);
            }
            Err(_) => {
                guard.breaker.release(permit);
                return Err(ctx.deadline_exceeded());
            }
        };

        let sent = tokio::time::timeout_at(ctx.deadline, self.transport.send(&authorized, ctx.deadline)).await;
        match sent {
            Ok(Ok(raw)) => self.classify(raw, guard, permit),
            Ok(Err(err)) if err.kind == TransportErrorKind::Timeout && ctx.is_expired() => {
                self.deadline_during_dispatch(guard, permit);
                Err(ctx.deadline_exceeded())
            }
            Ok(Err(err)) => {
                guard.breaker.on_failure(permit);
                Err(err.into())
            }
            Err(_) => {
                self.deadline_during_dispatch(guard, permit);
                Err(ctx.deadline_exceeded())
            }
        }
    }

    async fn acquire_token(&self, ctx: &RequestContext, guard: &TargetGuard) -> Result<()> {
        if ctx.is_expired() {
            return Err(ctx.deadline_exceeded());
        }

        let wait = guard.limiter.acquire_timeout();
        let until = Instant::now()
            .checked_add(wait)
            .map_or(ctx.deadline, |until| until.min(ctx.deadline));
        match guard.limiter.acquire_until(1, until).await {
            Ok(()) => Ok(()),
            Err(AcquireError::CostExceedsCapacity { cost, capacity }) => Err(Error::config(format!(
                "Rate limiter for '{}' cannot admit cost {cost} with capacity {capacity}",
                ctx.target
            ))),
            Err(AcquireError::TimedOut { waited }) => {
                if ctx.is_expired() {
                    Err(ctx.deadline_exceeded())
                } else {
                    Err(Error::RateLimitExceeded {
                        target: ctx.target.clone(),
                        waited_ms: waited.as_millis() as u64,
                    })
                }
            }
        }
    }

    /// Map a response to success or a typed error, recording one breaker outcome.
    fn classify(&self, raw: RawResponse, guard: &TargetGuard, permit: BreakerPermit) -> Result<RawResponse> {
        if raw.status < 400 {
            guard.breaker.on_success(permit);
            return Ok(raw);
        }

        let retry_after = match raw.status {
            429 | 503 => raw.retry_after(),
            _ => None,
        };
        let err = Error::from_status(raw.status, raw.text(), retry_after);
        if err.is_breaker_failure() {
            guard.breaker.on_failure(permit);
        } else {
            guard.breaker.on_success(permit);
        }
        Err(err)
    }

    fn deadline_during_dispatch(&self, guard: &TargetGuard, permit: BreakerPermit) {
        if guard.breaker.config().count_deadline_as_failure {
            guard.breaker.on_failure(permit);
        } else {
            guard.breaker.release(permit);
        }
    }

    fn should_reauthenticate(&self, err: &Error, auth: &AuthProvider, already: bool) -> bool {
        !already
            && self.config.reauth_on_unauthorized
            && matches!(auth, AuthProvider::OAuth(_))
            && err.status() == Some(401)
    }
}
