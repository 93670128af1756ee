//! bwp HTTP API
//!
//! HTTP API endpoints for:
//! - Job submission (`POST /post/http`)
//! - Pool status (`GET /status`)
//! - Health probes and monitoring
//! - Prometheus metrics and the OpenAPI document

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;
use utoipa::OpenApi;

use bwp_common::{ExecutionMetrics, ExecutionTimeMetrics, HttpJob, PoolStats, DEFAULT_METHOD};

use crate::pool::WorkerPool;

pub mod error;
pub mod model;

pub use error::ApiError;
use error::{BODY_NOT_BASE64, INVALID_JSON_DATA, INVALID_POST_BODY, URL_NOT_SET};
use model::{
    ErrorResponse, HttpJobRequest, MonitoringResponse, ProbeResponse, SimpleHealthResponse,
    SubmitResponse,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<WorkerPool>,
    /// Set while this process hands its listeners to a successor or shuts down
    pub draining: Arc<AtomicBool>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            draining: Arc::new(AtomicBool::new(false)),
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

/// Router-level limits
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "bwp API",
        version = "0.1.0",
        description = "Fire-and-forget HTTP job submission backed by a bounded worker pool"
    ),
    paths(
        post_http_jobs,
        status_handler,
        health_handler,
        liveness_probe,
        readiness_probe,
        metrics_handler,
        monitoring_handler,
    ),
    components(schemas(
        HttpJobRequest,
        SubmitResponse,
        ErrorResponse,
        PoolStats,
        SimpleHealthResponse,
        ProbeResponse,
        MonitoringResponse,
        ExecutionMetrics,
        ExecutionTimeMetrics,
    )),
    tags(
        (name = "jobs", description = "Job submission"),
        (name = "health", description = "Health check endpoints"),
        (name = "monitoring", description = "Monitoring and metrics endpoints"),
    )
)]
pub struct ApiDoc;

/// Create the router with all endpoints and the default limits
pub fn create_router(state: AppState) -> Router {
    create_router_with_options(state, RouterOptions::default())
}

pub fn create_router_with_options(state: AppState, options: RouterOptions) -> Router {
    Router::new()
        .route("/post/http", post(post_http_jobs))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/metrics", get(metrics_handler))
        .route("/monitoring", get(monitoring_handler))
        .route("/api-doc/openapi.json", get(openapi_handler))
        .layer(DefaultBodyLimit::max(options.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            options.request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Job Submission
// ============================================================================

/// Submit one job object or an array of them.
///
/// Batch elements are validated and queued in order. The first failing
/// element stops the batch; the elements before it stay queued.
#[utoipa::path(
    post,
    path = "/post/http",
    tag = "jobs",
    request_body = HttpJobRequest,
    responses(
        (status = 200, description = "All jobs queued", body = SubmitResponse),
        (status = 400, description = "Invalid submission", body = ErrorResponse),
        (status = 503, description = "Queue full or pool closed", body = ErrorResponse)
    )
)]
async fn post_http_jobs(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SubmitResponse>, ApiError> {
    if body.len() < 2 {
        debug!(len = body.len(), "Rejected short submission body");
        return Err(ApiError::bad_request(INVALID_POST_BODY));
    }

    match body[0] {
        b'[' => {
            let requests: Vec<HttpJobRequest> = parse_json(&body)?;
            for (index, request) in requests.into_iter().enumerate() {
                if let Err(source) = submit_one(&state.pool, request) {
                    debug!(index = index, error = %source, "Batch stopped at failing element");
                    return Err(ApiError::Batch {
                        index,
                        accepted: index,
                        source: Box::new(source),
                    });
                }
            }
        }
        b'{' => {
            let request: HttpJobRequest = parse_json(&body)?;
            submit_one(&state.pool, request)?;
        }
        _ => {
            debug!("Rejected submission that is not a JSON object or array");
            return Err(ApiError::bad_request(INVALID_JSON_DATA));
        }
    }

    Ok(Json(SubmitResponse { success: true }))
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "Rejected malformed JSON submission");
        ApiError::bad_request(format!("{}: {}", INVALID_JSON_DATA, e))
    })
}

/// Validate one element and hand it to the pool.
fn submit_one(pool: &WorkerPool, request: HttpJobRequest) -> Result<(), ApiError> {
    let mut job = pool.recycler().acquire();
    if let Err(e) = fill_job(&mut job, request) {
        pool.recycler().release(job);
        return Err(e);
    }
    pool.add_http_job(job)?;
    Ok(())
}

/// Copy a submission into a recycled job, decoding the base64 body.
pub fn fill_job(job: &mut HttpJob, request: HttpJobRequest) -> Result<(), ApiError> {
    if let Some(body) = request.body.as_deref() {
        base64::engine::general_purpose::STANDARD
            .decode_vec(body, &mut job.body)
            .map_err(|_| ApiError::InvalidJob(BODY_NOT_BASE64))?;
    }

    match request.url.as_deref() {
        Some(url) if !url.is_empty() => job.url.push_str(url),
        _ => return Err(ApiError::InvalidJob(URL_NOT_SET)),
    }

    match request.method.as_deref() {
        Some(method) if !method.is_empty() => {
            job.method.push_str(method);
            job.method.make_ascii_uppercase();
        }
        _ => job.method.push_str(DEFAULT_METHOD),
    }

    if let Some(headers) = request.headers {
        job.headers.extend(headers);
    }
    if let Some(parameters) = request.parameters {
        job.parameters.extend(parameters);
    }

    Ok(())
}

// ============================================================================
// Status Endpoints
// ============================================================================

/// Pool counters
#[utoipa::path(
    get,
    path = "/status",
    tag = "monitoring",
    responses(
        (status = 200, description = "Pool counters", body = PoolStats)
    )
)]
async fn status_handler(State(state): State<AppState>) -> Json<PoolStats> {
    Json(state.pool.stats())
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = SimpleHealthResponse)
    )
)]
async fn health_handler(State(state): State<AppState>) -> Json<SimpleHealthResponse> {
    let status = if state.is_draining() { "DRAINING" } else { "UP" };
    Json(SimpleHealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Liveness probe - 200 while the process is serving
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is live", body = ProbeResponse)
    )
)]
async fn liveness_probe() -> Json<ProbeResponse> {
    Json(ProbeResponse { status: "LIVE".to_string() })
}

/// Readiness probe - 503 once draining or the pool is closed
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Accepting jobs", body = ProbeResponse),
        (status = 503, description = "Not accepting jobs", body = ProbeResponse)
    )
)]
async fn readiness_probe(State(state): State<AppState>) -> Response {
    if state.pool.is_running() && !state.is_draining() {
        (StatusCode::OK, Json(ProbeResponse { status: "READY".to_string() })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProbeResponse { status: "NOT_READY".to_string() }),
        )
            .into_response()
    }
}

/// Prometheus metrics endpoint
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "monitoring",
    responses(
        (status = 200, description = "Prometheus metrics", content_type = "text/plain"),
        (status = 404, description = "No exporter installed")
    )
)]
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Detailed monitoring information
#[utoipa::path(
    get,
    path = "/monitoring",
    tag = "monitoring",
    responses(
        (status = 200, description = "Monitoring data", body = MonitoringResponse)
    )
)]
async fn monitoring_handler(State(state): State<AppState>) -> Json<MonitoringResponse> {
    Json(MonitoringResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        pid: std::process::id(),
        draining: state.is_draining(),
        pool: state.pool.stats(),
        metrics: state.pool.metrics(),
        recycled_idle: state.pool.recycler().idle(),
    })
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
