use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

pub mod logging;

// ============================================================================
// Job Types
// ============================================================================

/// Kind tag of the HTTP job variant, as used by `add_job` and the ingestion path.
pub const HTTP_JOB_KIND: &str = "http";

/// Method used when a job does not name one.
pub const DEFAULT_METHOD: &str = "GET";

/// One outbound HTTP call to perform on behalf of a submitter.
///
/// Values are recycled between requests: `reset()` clears every field but
/// keeps the allocated capacity of the strings, the body and both maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpJob {
    pub url: String,
    pub method: String,
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub parameters: HashMap<String, String>,
}

impl HttpJob {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: DEFAULT_METHOD.to_string(),
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Method to execute with; an unset method means GET.
    pub fn effective_method(&self) -> &str {
        if self.method.is_empty() {
            DEFAULT_METHOD
        } else {
            &self.method
        }
    }

    /// Clear every field in place.
    pub fn reset(&mut self) {
        self.url.clear();
        self.method.clear();
        self.body.clear();
        self.headers.clear();
        self.parameters.clear();
    }

    pub fn is_reset(&self) -> bool {
        self.url.is_empty()
            && self.method.is_empty()
            && self.body.is_empty()
            && self.headers.is_empty()
            && self.parameters.is_empty()
    }
}

/// A unit of background work, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Http(HttpJob),
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Http(_) => HTTP_JOB_KIND,
        }
    }
}

impl From<HttpJob> for Job {
    fn from(job: HttpJob) -> Self {
        Job::Http(job)
    }
}

// ============================================================================
// Execution Types
// ============================================================================

/// Classification of a single job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionResult {
    /// Downstream answered with a 2xx status
    Success,
    /// Downstream answered with a non-2xx status
    ErrorStatus,
    /// The request did not complete within the execution timeout
    ErrorTimeout,
    /// Downstream unreachable or the connection broke
    ErrorConnection,
    /// The job could not be turned into a valid request (bad method, header, url)
    ErrorRequest,
}

impl ExecutionResult {
    /// Label used for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionResult::Success => "success",
            ExecutionResult::ErrorStatus => "status",
            ExecutionResult::ErrorTimeout => "timeout",
            ExecutionResult::ErrorConnection => "connection",
            ExecutionResult::ErrorRequest => "request",
        }
    }
}

/// Outcome of executing a job. Never reported back to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub result: ExecutionResult,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
}

impl JobOutcome {
    pub fn success(status_code: u16) -> Self {
        Self {
            result: ExecutionResult::Success,
            status_code: Some(status_code),
            error_message: None,
        }
    }

    pub fn error_status(status_code: u16) -> Self {
        Self {
            result: ExecutionResult::ErrorStatus,
            status_code: Some(status_code),
            error_message: Some(format!("HTTP {}", status_code)),
        }
    }

    pub fn error_timeout(message: String) -> Self {
        Self {
            result: ExecutionResult::ErrorTimeout,
            status_code: None,
            error_message: Some(message),
        }
    }

    pub fn error_connection(message: String) -> Self {
        Self {
            result: ExecutionResult::ErrorConnection,
            status_code: None,
            error_message: Some(message),
        }
    }

    pub fn error_request(message: String) -> Self {
        Self {
            result: ExecutionResult::ErrorRequest,
            status_code: None,
            error_message: Some(message),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == ExecutionResult::Success
    }
}

// ============================================================================
// Observability Types
// ============================================================================

/// Snapshot of the worker pool, served at `GET /status`.
///
/// Each counter is read independently; the four values are not taken
/// atomically together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Maximum number of jobs that may wait in the queue
    pub queue_limit: usize,
    /// Number of persistent workers
    pub workers: usize,
    /// Workers currently executing a job
    pub active_workers: usize,
    /// Jobs currently waiting in the queue
    pub jobs_in_queue: usize,
}

/// Totals and timings collected by the pool since startup
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    /// Jobs admitted into the queue
    pub total_accepted: u64,
    /// Submissions refused at admission (full queue, closed pool, unknown kind)
    pub total_rejected: u64,
    /// Jobs whose request got a 2xx answer
    pub total_succeeded: u64,
    /// Jobs that failed (status, timeout, connection or request error)
    pub total_failed: u64,
    /// Jobs dropped from the queue at shutdown
    pub total_discarded: u64,
    /// Success rate over executed jobs (0.0 - 1.0)
    pub success_rate: f64,
    /// Execution time over the retained sample window
    pub execution_time: ExecutionTimeMetrics,
}

/// Execution time metrics with percentiles
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTimeMetrics {
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub sample_count: u64,
}
