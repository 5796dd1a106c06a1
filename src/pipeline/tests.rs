//! Tests for the request pipeline

use super::*;
use crate::auth::{AuthProvider, Credential, OAuthProvider, TokenGrant, TokenRefresher};
use crate::breaker::{CircuitBreakerConfig, CircuitState};
use crate::error::{Error, Result, TransportError};
use crate::http::{ApiRequest, RateLimiterConfig, RawResponse, Transport};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::schema::{AnyJson, Typed};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Test doubles
// ============================================================================

enum Step {
    Respond(RawResponse),
    Fail(TransportError),
    Hang,
}

/// Transport that replays a script and records what it was sent
#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    fn seen(&self) -> Vec<ApiRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        _deadline: Instant,
    ) -> std::result::Result<RawResponse, TransportError> {
        self.seen.lock().push(request.clone());
        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Respond(raw)) => Ok(raw),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Err(TransportError::timeout("hung"))
            }
            None => Ok(ok()),
        }
    }
}

struct CountingRefresher {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self, _current: &Credential) -> Result<TokenGrant> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(Error::token_refresh("invalid_grant"));
        }
        Ok(TokenGrant {
            access_token: format!("token-{n}"),
            refresh_token: None,
            expires_in: Some(Duration::from_secs(3_600)),
        })
    }
}

fn ok() -> RawResponse {
    RawResponse::json_body(200, &json!({"id": 1}))
}

fn status(code: u16) -> Step {
    Step::Respond(RawResponse::new(code).with_body("error"))
}

fn retry(attempts: u32) -> RetryConfig {
    RetryConfig::new()
        .backoff(Duration::from_millis(100), Duration::from_secs(2))
        .jitter(0.0)
        .max_attempts(attempts)
}

fn breaker(threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig::new()
        .failure_threshold(threshold)
        .rolling_window(threshold * 2)
        .reset_timeout(Duration::from_secs(10))
}

fn pipeline_with(
    transport: Arc<ScriptedTransport>,
    retry: RetryConfig,
    breaker: CircuitBreakerConfig,
    limiter: RateLimiterConfig,
) -> RequestPipeline {
    let registry = TargetRegistry::builder()
        .default_target("api.test", breaker, limiter)
        .build();
    RequestPipeline::new(Arc::new(registry), transport).with_retry(RetryPolicy::new(retry))
}

fn pipeline(transport: Arc<ScriptedTransport>, retry: RetryConfig) -> RequestPipeline {
    pipeline_with(transport, retry, breaker(5), RateLimiterConfig::new(100, 100.0))
}

fn target_state(pipeline: &RequestPipeline) -> (CircuitState, u32) {
    let snap = &pipeline.snapshot()[0];
    (snap.breaker.state, snap.breaker.failure_count)
}

// ============================================================================
// Classification and retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_success_on_first_attempt() {
    let transport = ScriptedTransport::new(vec![]);
    let pipeline = pipeline(transport.clone(), retry(3));

    let value = pipeline.execute(ApiRequest::get("/items"), &AnyJson).await.unwrap();

    assert_eq!(value, json!({"id": 1}));
    assert_eq!(transport.calls(), 1);
    assert_eq!(target_state(&pipeline), (CircuitState::Closed, 0));
}

#[tokio::test(start_paused = true)]
async fn test_client_error_not_retried_and_not_breaker_failure() {
    let transport = ScriptedTransport::new(vec![status(404)]);
    let pipeline = pipeline(transport.clone(), retry(5));

    let err = pipeline.execute_raw(ApiRequest::get("/missing")).await.unwrap_err();

    assert!(matches!(err, Error::Client { status: 404, .. }));
    assert_eq!(transport.calls(), 1);
    assert_eq!(target_state(&pipeline), (CircuitState::Closed, 0));
}

#[tokio::test(start_paused = true)]
async fn test_server_error_retried_then_succeeds() {
    let transport = ScriptedTransport::new(vec![status(503), status(503)]);
    let pipeline = pipeline(transport.clone(), retry(3));

    let started = Instant::now();
    let raw = pipeline.execute_raw(ApiRequest::get("/flaky")).await.unwrap();

    assert_eq!(raw.status, 200);
    assert_eq!(transport.calls(), 3);
    // 100ms then 200ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(target_state(&pipeline), (CircuitState::Closed, 2));
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_returns_last_error() {
    let transport = ScriptedTransport::new(vec![status(500), status(502), status(504)]);
    let pipeline = pipeline(transport.clone(), retry(3));

    let err = pipeline.execute_raw(ApiRequest::get("/down")).await.unwrap_err();

    assert!(matches!(err, Error::Server { status: 504, .. }));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_retried() {
    let transport = ScriptedTransport::new(vec![Step::Fail(TransportError::connect("refused"))]);
    let pipeline = pipeline(transport.clone(), retry(2));

    assert!(pipeline.execute_raw(ApiRequest::get("/")).await.is_ok());
    assert_eq!(transport.calls(), 2);
    assert_eq!(target_state(&pipeline), (CircuitState::Closed, 1));
}

#[tokio::test(start_paused = true)]
async fn test_429_honors_retry_after() {
    let transport = ScriptedTransport::new(vec![Step::Respond(
        RawResponse::new(429).with_header("Retry-After", "2"),
    )]);
    let pipeline = pipeline(transport.clone(), retry(3));

    let started = Instant::now();
    pipeline.execute_raw(ApiRequest::get("/limited")).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(transport.calls(), 2);
}

// ============================================================================
// Circuit breaker integration
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_open_circuit_fails_fast_without_network() {
    let transport = ScriptedTransport::new(vec![status(500), status(500)]);
    let pipeline = pipeline_with(
        transport.clone(),
        RetryConfig::no_retries(),
        breaker(2),
        RateLimiterConfig::new(100, 100.0),
    );

    for _ in 0..2 {
        assert!(pipeline.execute_raw(ApiRequest::get("/")).await.is_err());
    }
    assert_eq!(target_state(&pipeline).0, CircuitState::Open);

    let err = pipeline.execute_raw(ApiRequest::get("/")).await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { ref target } if target == "api.test"));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_open_is_not_retried() {
    let transport = ScriptedTransport::new(vec![status(500)]);
    let pipeline = pipeline_with(
        transport.clone(),
        retry(5),
        breaker(1),
        RateLimiterConfig::new(100, 100.0),
    );

    // First attempt trips the breaker, the retry is refused without dispatch
    let err = pipeline.execute_raw(ApiRequest::get("/")).await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_trial_request_closes_circuit() {
    let transport = ScriptedTransport::new(vec![status(500)]);
    let pipeline = pipeline_with(
        transport.clone(),
        RetryConfig::no_retries(),
        breaker(1),
        RateLimiterConfig::new(100, 100.0),
    );

    assert!(pipeline.execute_raw(ApiRequest::get("/")).await.is_err());
    tokio::time::advance(Duration::from_secs(10)).await;

    assert!(pipeline.execute_raw(ApiRequest::get("/")).await.is_ok());
    assert_eq!(target_state(&pipeline), (CircuitState::Closed, 0));
}

// ============================================================================
// Deadlines
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_deadline_inside_retry_delay_stops_without_dispatch() {
    let transport = ScriptedTransport::new(vec![status(503)]);
    let retry = RetryConfig::new()
        .backoff(Duration::from_secs(1), Duration::from_secs(5))
        .jitter(0.0)
        .max_attempts(5);
    let pipeline = pipeline(transport.clone(), retry);

    let request = ApiRequest::get("/").timeout(Duration::from_millis(500));
    let err = pipeline.execute_raw(request).await.unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded { .. }));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_huge_retry_after_ends_at_deadline() {
    let transport = ScriptedTransport::new(vec![Step::Respond(
        RawResponse::new(429).with_header("Retry-After", "18446744073709551615"),
    )]);
    let pipeline = pipeline(transport.clone(), retry(3));

    let request = ApiRequest::get("/limited").timeout(Duration::from_secs(30));
    let err = pipeline.execute_raw(request).await.unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded { .. }));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_request_timeout() {
    let transport = ScriptedTransport::new(vec![status(503)]);
    let pipeline = pipeline(transport.clone(), retry(3));

    let request = ApiRequest::get("/").timeout(Duration::MAX);
    pipeline.execute_raw(request).await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_during_dispatch_is_not_a_breaker_failure() {
    let transport = ScriptedTransport::new(vec![Step::Hang]);
    let pipeline = pipeline(transport.clone(), retry(3));

    let request = ApiRequest::get("/slow").timeout(Duration::from_millis(200));
    let err = pipeline.execute_raw(request).await.unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded { .. }));
    assert!(!err.is_retryable());
    assert_eq!(transport.calls(), 1);
    assert_eq!(target_state(&pipeline), (CircuitState::Closed, 0));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_during_trial_returns_permit() {
    let transport = ScriptedTransport::new(vec![status(500), Step::Hang]);
    let pipeline = pipeline_with(
        transport.clone(),
        RetryConfig::no_retries(),
        breaker(1),
        RateLimiterConfig::new(100, 100.0),
    );

    assert!(pipeline.execute_raw(ApiRequest::get("/")).await.is_err());
    tokio::time::advance(Duration::from_secs(10)).await;

    let request = ApiRequest::get("/").timeout(Duration::from_millis(100));
    let err = pipeline.execute_raw(request).await.unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded { .. }));
    assert_eq!(target_state(&pipeline).0, CircuitState::Open);

    // The next request receives the trial permit
    assert!(pipeline.execute_raw(ApiRequest::get("/")).await.is_ok());
    assert_eq!(target_state(&pipeline).0, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_counted_as_failure_when_configured() {
    let transport = ScriptedTransport::new(vec![Step::Hang]);
    let mut breaker = breaker(5);
    breaker.count_deadline_as_failure = true;
    let pipeline = pipeline_with(
        transport.clone(),
        retry(1),
        breaker,
        RateLimiterConfig::new(100, 100.0),
    );

    let request = ApiRequest::get("/").timeout(Duration::from_millis(100));
    assert!(pipeline.execute_raw(request).await.is_err());
    assert_eq!(target_state(&pipeline), (CircuitState::Closed, 1));
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rate_limit_wait_exhausted() {
    let transport = ScriptedTransport::new(vec![]);
    let pipeline = pipeline_with(
        transport.clone(),
        retry(3),
        breaker(5),
        RateLimiterConfig::new(1, 0.0).acquire_timeout(Duration::from_millis(50)),
    );

    assert!(pipeline.execute_raw(ApiRequest::get("/")).await.is_ok());
    let err = pipeline.execute_raw(ApiRequest::get("/")).await.unwrap_err();

    assert!(matches!(err, Error::RateLimitExceeded { waited_ms: 50, .. }));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_each_attempt_takes_one_token() {
    let transport = ScriptedTransport::new(vec![status(503), status(503)]);
    let pipeline = pipeline_with(
        transport.clone(),
        retry(3),
        breaker(5),
        RateLimiterConfig::new(10, 0.0),
    );

    pipeline.execute_raw(ApiRequest::get("/")).await.unwrap();
    let tokens = pipeline.snapshot()[0].limiter.available_tokens;
    assert!((tokens - 7.0).abs() < 1e-6, "{tokens}");
}

// ============================================================================
// Correlation, validation and routing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_correlation_id_reused_across_attempts() {
    let transport = ScriptedTransport::new(vec![status(503), status(500)]);
    let pipeline = pipeline(transport.clone(), retry(3));

    pipeline.execute_raw(ApiRequest::get("/")).await.unwrap();

    let ids: Vec<String> = transport
        .seen()
        .iter()
        .map(|r| r.header_value("X-Correlation-ID").unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0].len(), 36);
    assert!(ids.iter().all(|id| id == &ids[0]));
}

#[tokio::test(start_paused = true)]
async fn test_caller_correlation_id_is_kept() {
    let transport = ScriptedTransport::new(vec![]);
    let pipeline = pipeline(transport.clone(), retry(1));

    let request = ApiRequest::get("/").header("X-Correlation-ID", "abc-123");
    pipeline.execute_raw(request).await.unwrap();

    assert_eq!(
        transport.seen()[0].header_value("x-correlation-id"),
        Some("abc-123")
    );
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Item {
    id: String,
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_is_terminal() {
    let transport = ScriptedTransport::new(vec![]);
    let pipeline = pipeline(transport.clone(), retry(5));

    let err = pipeline
        .execute(ApiRequest::get("/item"), &Typed::<Item>::new())
        .await
        .unwrap_err();

    match err {
        Error::Validation(v) => assert_eq!(v.path, "$.id"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(transport.calls(), 1);
    assert_eq!(target_state(&pipeline), (CircuitState::Closed, 0));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_target() {
    let transport = ScriptedTransport::new(vec![]);
    let pipeline = pipeline(transport.clone(), retry(1));

    let err = pipeline
        .execute_raw(ApiRequest::get("/").target("other"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownTarget { ref target } if target == "other"));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_absolute_url_routed_by_host() {
    let transport = ScriptedTransport::new(vec![status(500)]);
    let registry = TargetRegistry::builder()
        .default_target("api.test", breaker(5), RateLimiterConfig::default())
        .target("files.test", breaker(5), RateLimiterConfig::default())
        .build();
    let pipeline = RequestPipeline::new(Arc::new(registry), transport.clone())
        .with_retry(RetryPolicy::new(RetryConfig::no_retries()));

    assert!(pipeline
        .execute_raw(ApiRequest::get("https://files.test/upload"))
        .await
        .is_err());

    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot[0].target, "api.test");
    assert_eq!(snapshot[0].breaker.failure_count, 0);
    assert_eq!(snapshot[1].target, "files.test");
    assert_eq!(snapshot[1].breaker.failure_count, 1);
}

// ============================================================================
// Auth
// ============================================================================

fn oauth_pipeline(
    transport: Arc<ScriptedTransport>,
    refresher: Arc<CountingRefresher>,
) -> RequestPipeline {
    let oauth = OAuthProvider::new(
        refresher,
        Credential::oauth("initial", None, None),
        Duration::from_secs(30),
    );
    let registry = TargetRegistry::builder()
        .default_target("api.test", breaker(5), RateLimiterConfig::default())
        .tenant("acme", AuthProvider::OAuth(oauth))
        .build();
    RequestPipeline::new(Arc::new(registry), transport).with_retry(RetryPolicy::new(retry(3)))
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_triggers_single_reauth() {
    let transport = ScriptedTransport::new(vec![status(401)]);
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let pipeline = oauth_pipeline(transport.clone(), refresher.clone());

    pipeline
        .execute_raw(ApiRequest::get("/me").tenant("acme"))
        .await
        .unwrap();

    let seen = transport.seen();
    assert_eq!(seen[0].header_value("authorization"), Some("Bearer initial"));
    assert_eq!(seen[1].header_value("authorization"), Some("Bearer token-1"));
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_unauthorized_surfaces_client_error() {
    let transport = ScriptedTransport::new(vec![status(401), status(401), status(401)]);
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let pipeline = oauth_pipeline(transport.clone(), refresher.clone());

    let err = pipeline
        .execute_raw(ApiRequest::get("/me").tenant("acme"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Client { status: 401, .. }));
    assert_eq!(transport.calls(), 2);
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failure_is_terminal_auth_error() {
    let transport = ScriptedTransport::new(vec![status(401)]);
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        fail: true,
    });
    let pipeline = oauth_pipeline(transport.clone(), refresher.clone());

    let err = pipeline
        .execute_raw(ApiRequest::get("/me").tenant("acme"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TokenRefresh { .. }));
    assert_eq!(transport.calls(), 1);
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_tenant_is_auth_error() {
    let transport = ScriptedTransport::new(vec![]);
    let pipeline = pipeline(transport.clone(), retry(1));

    let err = pipeline
        .execute_raw(ApiRequest::get("/").tenant("nobody"))
        .await
        .unwrap_err();
    assert!(err.is_auth());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_target_state() {
    let transport = ScriptedTransport::new(vec![]);
    let pipeline = Arc::new(pipeline_with(
        transport.clone(),
        retry(1),
        breaker(5),
        RateLimiterConfig::new(20, 1.0),
    ));

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.execute_raw(ApiRequest::get("/")).await })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        assert!(result.unwrap().is_ok());
    }
    assert_eq!(transport.calls(), 20);
    assert!(pipeline.snapshot()[0].limiter.available_tokens < 1.0);
}
