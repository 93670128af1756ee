//! HttpExecutor Tests
//!
//! Tests for:
//! - Parameter placement (query string vs form body)
//! - Header and body forwarding
//! - Outcome classification (2xx, non-2xx, timeout, connection, invalid)
//! - Body reads counted against the request timeout
//! - End-to-end execution through the worker pool

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{body_bytes, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bwp_common::{ExecutionResult, HttpJob, Job};
use bwp_dispatch::{
    default_registry, HttpExecutor, HttpExecutorConfig, JobExecutor, WorkerPool, WorkerPoolConfig,
};

fn executor() -> HttpExecutor {
    HttpExecutor::with_config(HttpExecutorConfig {
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_get_sends_parameters_in_query() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ping"))
        .and(query_param("user", "42"))
        .and(query_param("flag", "on"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let job = HttpJob::new(format!("{}/ping", mock_server.uri()))
        .with_parameter("user", "42")
        .with_parameter("flag", "on");

    let outcome = executor().execute(&Job::Http(job)).await;

    assert_eq!(outcome.result, ExecutionResult::Success);
    assert_eq!(outcome.status_code, Some(200));
    assert!(outcome.error_message.is_none());
}

#[tokio::test]
async fn test_post_without_body_form_encodes_parameters() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/form"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("name=bwp"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let job = HttpJob::new(format!("{}/form", mock_server.uri()))
        .with_method("POST")
        .with_parameter("name", "bwp");

    let outcome = executor().execute(&Job::Http(job)).await;
    assert_eq!(outcome.result, ExecutionResult::Success);
    assert_eq!(outcome.status_code, Some(201));
}

#[tokio::test]
async fn test_post_with_body_keeps_body_and_queries_parameters() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/raw"))
        .and(query_param("token", "abc"))
        .and(header("content-type", "application/json"))
        .and(body_bytes(b"{\"event\":\"signup\"}".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let job = HttpJob::new(format!("{}/raw", mock_server.uri()))
        .with_method("POST")
        .with_header("Content-Type", "application/json")
        .with_body(b"{\"event\":\"signup\"}".to_vec())
        .with_parameter("token", "abc");

    let outcome = executor().execute(&Job::Http(job)).await;
    assert_eq!(outcome.result, ExecutionResult::Success);
}

#[tokio::test]
async fn test_missing_method_executes_as_get() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/default"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut job = HttpJob::default();
    job.url = format!("{}/default", mock_server.uri());

    let outcome = executor().execute(&Job::Http(job)).await;
    assert_eq!(outcome.result, ExecutionResult::Success);
}

#[tokio::test]
async fn test_custom_headers_and_user_agent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/headers"))
        .and(header("x-trace", "t-1"))
        .and(header("user-agent", "bwp-test"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let executor = HttpExecutor::with_config(HttpExecutorConfig {
        user_agent: "bwp-test".to_string(),
        ..Default::default()
    })
    .unwrap();

    let job = HttpJob::new(format!("{}/headers", mock_server.uri()))
        .with_method("PUT")
        .with_header("X-Trace", "t-1");

    let outcome = executor.execute(&Job::Http(job)).await;
    assert_eq!(outcome.result, ExecutionResult::Success);
}

#[tokio::test]
async fn test_non_2xx_is_error_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    let executor = executor();

    let outcome = executor
        .execute(&Job::Http(HttpJob::new(format!("{}/missing", mock_server.uri()))))
        .await;
    assert_eq!(outcome.result, ExecutionResult::ErrorStatus);
    assert_eq!(outcome.status_code, Some(404));

    // attempted exactly once, no retry
    let outcome = executor
        .execute(&Job::Http(HttpJob::new(format!("{}/broken", mock_server.uri()))))
        .await;
    assert_eq!(outcome.result, ExecutionResult::ErrorStatus);
    assert_eq!(outcome.status_code, Some(500));
}

#[tokio::test]
async fn test_slow_downstream_is_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&mock_server)
        .await;

    let executor = HttpExecutor::with_config(HttpExecutorConfig {
        timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .unwrap();

    let outcome = executor
        .execute(&Job::Http(HttpJob::new(format!("{}/slow", mock_server.uri()))))
        .await;
    assert_eq!(outcome.result, ExecutionResult::ErrorTimeout);
    assert!(outcome.status_code.is_none());
}

#[tokio::test]
async fn test_body_stalled_after_headers_is_timeout() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    // promises 100 bytes, sends 3, then goes quiet
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = stream.read(&mut request).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nabc")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let executor = HttpExecutor::with_config(HttpExecutorConfig {
        timeout: Duration::from_millis(300),
        ..Default::default()
    })
    .unwrap();

    let outcome = executor
        .execute(&Job::Http(HttpJob::new(format!("http://{}/stall", address))))
        .await;
    assert_eq!(outcome.result, ExecutionResult::ErrorTimeout);
    assert!(outcome.status_code.is_none());

    server.abort();
}

#[tokio::test]
async fn test_unreachable_downstream_is_connection_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let outcome = executor()
        .execute(&Job::Http(HttpJob::new(format!("http://127.0.0.1:{}/", port))))
        .await;
    assert_eq!(outcome.result, ExecutionResult::ErrorConnection);
}

#[tokio::test]
async fn test_invalid_job_is_request_error() {
    let outcome = executor()
        .execute(&Job::Http(HttpJob::new("not-a-url")))
        .await;
    assert_eq!(outcome.result, ExecutionResult::ErrorRequest);

    let outcome = executor()
        .execute(&Job::Http(
            HttpJob::new("http://127.0.0.1/").with_header("bad header", "x"),
        ))
        .await;
    assert_eq!(outcome.result, ExecutionResult::ErrorRequest);
}

#[tokio::test]
async fn test_pool_executes_submitted_jobs_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&mock_server)
        .await;

    let executor = Arc::new(executor());
    let pool = WorkerPool::start(
        WorkerPoolConfig {
            workers: 2,
            queue_limit: 10,
            ..Default::default()
        },
        default_registry(executor),
    );

    for n in 0..3 {
        let job = HttpJob::new(format!("{}/hook", mock_server.uri()))
            .with_method("POST")
            .with_body(format!("{{\"n\":{}}}", n).into_bytes());
        pool.add_http_job(job).unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while pool.metrics().total_succeeded < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("jobs did not complete");

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}
