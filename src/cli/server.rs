//! HTTP server mode exposing the request pipeline over REST

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::breaker::CircuitState;
use crate::error::{Error, ErrorKind, Result};
use crate::http::ApiRequest;
use crate::pipeline::RequestPipeline;
use crate::schema::{AnyJson, JsonSchema};
use crate::types::{Method, StringMap};

/// App state shared across handlers
#[derive(Clone)]
struct AppState {
    name: String,
    pipeline: Arc<RequestPipeline>,
}

/// Request body for the proxy endpoint
#[derive(Debug, Deserialize)]
struct ProxyRequest {
    #[serde(default)]
    method: Method,
    /// Relative path or absolute URL
    path: String,
    #[serde(default)]
    query: Vec<(String, String)>,
    #[serde(default)]
    headers: StringMap,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    tenant: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    /// Schema the response must match
    #[serde(default)]
    schema: Option<JsonSchema>,
}

impl ProxyRequest {
    fn split(self) -> (ApiRequest, Option<JsonSchema>) {
        let request = ApiRequest {
            method: self.method,
            path: self.path,
            query: self.query,
            headers: self.headers,
            body: self.body,
            target: self.target,
            tenant: self.tenant,
            timeout: self.timeout_ms.map(Duration::from_millis),
        };
        (request, self.schema)
    }
}

/// Response wrapper
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
            upstream_status: None,
        }
    }

    fn error(err: &Error) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(err.to_string()),
            kind: Some(err.kind().as_str()),
            upstream_status: err.status(),
        }
    }
}

/// HTTP status returned to the caller for a pipeline error
fn status_for(err: &Error) -> StatusCode {
    match err.kind() {
        ErrorKind::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Config => StatusCode::BAD_REQUEST,
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::Client => err
            .status()
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::BAD_GATEWAY),
        ErrorKind::Transport | ErrorKind::Server | ErrorKind::Validation => StatusCode::BAD_GATEWAY,
        ErrorKind::Other => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build the router over a shared pipeline
pub fn router(name: impl Into<String>, pipeline: Arc<RequestPipeline>) -> Router {
    let state = AppState {
        name: name.into(),
        pipeline,
    };

    // Allow all origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/request", post(proxy_request))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Start the HTTP server
pub async fn serve(name: String, pipeline: Arc<RequestPipeline>, port: u16) -> Result<()> {
    let app = router(name, pipeline);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::config(format!("Failed to bind to port {port}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::config(format!("Server error: {e}")))?;

    Ok(())
}

/// Health check with per-target breaker and limiter state
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let targets = state.pipeline.snapshot();
    let degraded = targets
        .iter()
        .any(|t| t.breaker.state != CircuitState::Closed);

    Json(json!({
        "status": if degraded { "degraded" } else { "ok" },
        "name": state.name,
        "targets": targets,
    }))
}

/// Run one request through the pipeline
async fn proxy_request(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProxyRequest>,
) -> impl IntoResponse {
    let (request, schema) = req.split();
    let result = match &schema {
        Some(schema) => state.pipeline.execute(request, schema).await,
        None => state.pipeline.execute(request, &AnyJson).await,
    };

    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Err(e) => (status_for(&e), Json(ApiResponse::<()>::error(&e))).into_response(),
    }
}
