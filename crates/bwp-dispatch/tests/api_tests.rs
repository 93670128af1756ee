//! HTTP API Tests
//!
//! Tests for:
//! - Submission body validation and error messages
//! - Single and batch admission, including partial batches
//! - Queue full / closed pool responses
//! - Status, health and metrics endpoints

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use bwp_dispatch::api::{create_router, AppState};
use bwp_dispatch::{default_registry, HttpExecutor, WorkerPool, WorkerPoolConfig};

/// Pool without workers so accepted jobs stay queued
fn idle_pool(queue_limit: usize) -> Arc<WorkerPool> {
    let executor = Arc::new(HttpExecutor::new().unwrap());
    Arc::new(WorkerPool::start(
        WorkerPoolConfig {
            workers: 0,
            queue_limit,
            ..Default::default()
        },
        default_registry(executor),
    ))
}

fn app(pool: &Arc<WorkerPool>) -> (Router, AppState) {
    let state = AppState::new(pool.clone());
    (create_router(state.clone()), state)
}

async fn post(app: Router, body: &str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/post/http")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Body validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_short_body_is_invalid_post_body() {
    let pool = idle_pool(5);

    for body in ["", "{"] {
        let (app, _) = app(&pool);
        let response = post(app, body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Invalid post body");
    }
    assert_eq!(pool.queue_length(), 0);
}

#[tokio::test]
async fn test_non_json_body_is_invalid_json_data() {
    let pool = idle_pool(5);
    let (app, _) = app(&pool);

    let response = post(app, "url=http://example.com").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "Invalid json data");
    assert!(json.get("index").is_none());
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let pool = idle_pool(5);
    let (app, _) = app(&pool);

    let response = post(app, r#"{"url": "http://example.com""#).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().starts_with("Invalid json data"));
    assert_eq!(pool.queue_length(), 0);
}

#[tokio::test]
async fn test_missing_url_is_rejected() {
    let pool = idle_pool(5);
    let (app, _) = app(&pool);

    let response = post(app, r#"{"method": "POST"}"#).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid request, url is not set");
    assert_eq!(pool.queue_length(), 0);
    // the unused job went back to the free list
    assert_eq!(pool.recycler().idle(), 1);
}

#[tokio::test]
async fn test_body_must_be_base64() {
    let pool = idle_pool(5);
    let (app, _) = app(&pool);

    // body is checked before url
    let response = post(app, r#"{"body": "%%% not base64"}"#).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid request, body must be base64 encoded");
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_single_job_is_queued() {
    let pool = idle_pool(5);
    let (app, _) = app(&pool);

    let body = r#"{
        "url": "http://example.com/hook",
        "method": "post",
        "body": "aGVsbG8=",
        "headers": {"X-Trace": "1"},
        "parameters": {"a": "b"},
        "extra": "ignored"
    }"#;
    let response = post(app, body).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json, serde_json::json!({"success": true}));
    assert_eq!(pool.queue_length(), 1);
    assert_eq!(pool.metrics().total_accepted, 1);
}

#[tokio::test]
async fn test_batch_is_queued_in_order() {
    let pool = idle_pool(5);
    let (app, _) = app(&pool);

    let body = r#"[
        {"url": "http://example.com/1"},
        {"url": "http://example.com/2", "method": "DELETE"},
        {"url": "http://example.com/3"}
    ]"#;
    let response = post(app, body).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(pool.queue_length(), 3);
}

#[tokio::test]
async fn test_batch_stops_at_first_invalid_element() {
    let pool = idle_pool(5);
    let (app, _) = app(&pool);

    let body = r#"[
        {"url": "http://example.com/1"},
        {"method": "GET"},
        {"url": "http://example.com/3"}
    ]"#;
    let response = post(app, body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "invalid request, url is not set");
    assert_eq!(json["index"], 1);
    assert_eq!(json["accepted"], 1);

    // the element before the failure stays queued, the one after is never tried
    assert_eq!(pool.queue_length(), 1);
}

#[tokio::test]
async fn test_full_queue_is_unavailable() {
    let pool = idle_pool(1);
    let (app, _) = app(&pool);

    let body = r#"[{"url": "http://example.com/1"}, {"url": "http://example.com/2"}]"#;
    let response = post(app, body).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["error"], "job queue is full");
    assert_eq!(json["index"], 1);
    assert_eq!(json["accepted"], 1);
    assert_eq!(pool.queue_length(), 1);
    assert_eq!(pool.metrics().total_rejected, 1);
}

#[tokio::test]
async fn test_closed_pool_is_unavailable() {
    let pool = idle_pool(5);
    pool.shutdown().await;
    let (app, _) = app(&pool);

    let response = post(app, r#"{"url": "http://example.com"}"#).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["error"], "worker pool is closed");
}

// ---------------------------------------------------------------------------
// Status, health, metrics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_status_reports_pool_counters() {
    let pool = idle_pool(7);
    let (router, _) = app(&pool);
    post(router, r#"{"url": "http://example.com"}"#).await;

    let (router, _) = app(&pool);
    let response = get(router, "/status").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["queueLimit"], 7);
    assert_eq!(json["workers"], 0);
    assert_eq!(json["activeWorkers"], 0);
    assert_eq!(json["jobsInQueue"], 1);
}

#[tokio::test]
async fn test_readiness_follows_draining_flag() {
    let pool = idle_pool(5);

    let (router, state) = app(&pool);
    let response = get(router, "/health/ready").await;
    assert_eq!(response.status(), StatusCode::OK);

    state.draining.store(true, Ordering::SeqCst);
    let router = create_router(state.clone());
    let response = get(router, "/health/ready").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let router = create_router(state);
    let json = body_json(get(router, "/health").await).await;
    assert_eq!(json["status"], "DRAINING");

    // liveness is unaffected
    let (router, _) = app(&pool);
    assert_eq!(get(router, "/health/live").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_without_exporter_is_not_found() {
    let pool = idle_pool(5);
    let (router, _) = app(&pool);

    let response = get(router, "/metrics").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_monitoring_and_openapi() {
    let pool = idle_pool(5);

    let (router, _) = app(&pool);
    let json = body_json(get(router, "/monitoring").await).await;
    assert_eq!(json["pid"], std::process::id());
    assert_eq!(json["draining"], false);
    assert_eq!(json["pool"]["queueLimit"], 5);

    let (router, _) = app(&pool);
    let json = body_json(get(router, "/api-doc/openapi.json").await).await;
    assert!(json["paths"]["/post/http"].is_object());
}
