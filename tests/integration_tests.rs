//! Integration tests using mock HTTP server
//!
//! Tests the full end-to-end flow: YAML config → pipeline → HTTP requests → validated output

use resilient_connector::error::Error;
use resilient_connector::{load_config_from_str, AnyJson, ApiRequest, CircuitState, RequestPipeline, Typed};
use serde::Deserialize;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pipeline(server: &MockServer, extra: &str) -> RequestPipeline {
    let yaml = format!(
        r#"
name: integration
base_url: {}
http:
  request_timeout_ms: 5000
resilience:
  retry:
    base_delay_ms: 10
    max_delay_ms: 50
    max_attempts: 3
  circuit_breaker:
    failure_threshold: 3
    rolling_window: 5
    reset_timeout_ms: 60000
{extra}
"#,
        server.uri()
    );
    load_config_from_str(&yaml).unwrap().build_pipeline().unwrap()
}

// ============================================================================
// Retries and Breaker
// ============================================================================

#[tokio::test]
async fn test_retries_transient_503_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline(&server, "");
    let body = pipeline
        .execute(ApiRequest::get("/api/flaky"), &AnyJson)
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].breaker.state, CircuitState::Closed);
    assert_eq!(snapshot[0].breaker.failure_count, 1);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such user"))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline(&server, "");
    let err = pipeline
        .execute(ApiRequest::get("/api/missing"), &AnyJson)
        .await
        .unwrap_err();

    match err {
        Error::Client { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such user");
        }
        other => panic!("expected client error, got {other:?}"),
    }
    assert_eq!(pipeline.snapshot()[0].breaker.failure_count, 0);
}

#[tokio::test]
async fn test_breaker_opens_and_fails_fast() {
    let server = MockServer::start().await;

    // 3 attempts from the first request trip the breaker; nothing else gets through
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let pipeline = pipeline(&server, "");
    let first = pipeline
        .execute(ApiRequest::get("/api/down"), &AnyJson)
        .await
        .unwrap_err();
    assert_eq!(first.status(), Some(500));
    assert_eq!(pipeline.snapshot()[0].breaker.state, CircuitState::Open);

    let second = pipeline
        .execute(ApiRequest::get("/api/down"), &AnyJson)
        .await
        .unwrap_err();
    assert!(matches!(second, Error::CircuitOpen { .. }));
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_bearer_token_and_correlation_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/protected"))
        .and(header("Authorization", "Bearer test-token"))
        .and(header_exists("X-Correlation-ID"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline(
        &server,
        r#"
auth:
  type: bearer
  token: test-token
"#,
    );
    let body = pipeline
        .execute(ApiRequest::get("/api/protected"), &AnyJson)
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_tenant_credentials_are_isolated() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/me"))
        .and(header("X-API-Key", "acme-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tenant": "acme"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/me"))
        .and(header("X-API-Key", "globex-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tenant": "globex"})))
        .mount(&server)
        .await;

    let pipeline = pipeline(
        &server,
        r#"
tenants:
  acme:
    type: api_key
    name: X-API-Key
    value: acme-key
  globex:
    type: api_key
    name: X-API-Key
    value: globex-key
"#,
    );

    let acme = pipeline
        .execute(ApiRequest::get("/api/me").tenant("acme"), &AnyJson)
        .await
        .unwrap();
    let globex = pipeline
        .execute(ApiRequest::get("/api/me").tenant("globex"), &AnyJson)
        .await
        .unwrap();

    assert_eq!(acme["tenant"], "acme");
    assert_eq!(globex["tenant"], "globex");

    let err = pipeline
        .execute(ApiRequest::get("/api/me").tenant("initech"), &AnyJson)
        .await
        .unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn test_oauth_token_fetched_once_and_reused() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "issued-token",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("Authorization", "Bearer issued-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let pipeline = pipeline(
        &server,
        &format!(
            r#"
auth:
  type: oauth
  token_url: {}/oauth/token
  client_id: client
  client_secret: secret
"#,
            server.uri()
        ),
    );

    for _ in 0..2 {
        let body = pipeline
            .execute(ApiRequest::get("/api/orders"), &AnyJson)
            .await
            .unwrap();
        assert_eq!(body, json!([]));
    }
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Deserialize)]
struct User {
    id: u64,
    email: String,
}

#[tokio::test]
async fn test_typed_response_validation() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/users/1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": 1, "email": "a@example.com"})),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/users/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "two"})))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline(&server, "");

    let user = pipeline
        .execute(ApiRequest::get("/api/users/1"), &Typed::<User>::new())
        .await
        .unwrap();
    assert_eq!(user.id, 1);
    assert_eq!(user.email, "a@example.com");

    let err = pipeline
        .execute(ApiRequest::get("/api/users/2"), &Typed::<User>::new())
        .await
        .unwrap_err();
    match err {
        Error::Validation(v) => assert_eq!(v.path, "$.id"),
        other => panic!("expected validation error, got {other:?}"),
    }
}
