//! Job executors
//!
//! - `JobExecutor` trait, one implementation per job kind
//! - `ExecutorRegistry` mapping a kind tag to its executor
//! - `HttpExecutor`: performs exactly one outbound request per job and
//!   classifies the result. Nothing is retried and nothing is reported back
//!   to the submitter.

use async_trait::async_trait;
use bwp_common::{HttpJob, Job, JobOutcome, HTTP_JOB_KIND};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Executes jobs of one kind
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> JobOutcome;
}

/// Kind tag to executor lookup used by the pool for admission and dispatch
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: impl Into<String>, executor: Arc<dyn JobExecutor>) -> Self {
        self.register(kind, executor);
        self
    }

    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn JobExecutor>) {
        self.executors.insert(kind.into(), executor);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn JobExecutor>> {
        self.executors.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.executors.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Configuration for the HTTP executor
#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    /// Total time allowed for one request, including reading the response
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    /// Sent unless the job sets its own User-Agent header
    pub user_agent: String,
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 32,
            user_agent: format!("bwp/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Where the job's parameters end up in the outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterPlacement {
    Query,
    FormBody,
}

const BODILESS_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::DELETE,
    Method::OPTIONS,
    Method::TRACE,
    Method::CONNECT,
];

/// Methods that carry no request body by convention get their parameters in
/// the query string. Other methods form-encode parameters into the body,
/// unless the job brings a body of its own.
pub fn parameter_placement(method: &Method, has_body: bool) -> ParameterPlacement {
    if BODILESS_METHODS.contains(method) || has_body {
        ParameterPlacement::Query
    } else {
        ParameterPlacement::FormBody
    }
}

/// Executes [`HttpJob`]s with a shared keep-alive client
pub struct HttpExecutor {
    client: Client,
    config: HttpExecutorConfig,
}

impl HttpExecutor {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(HttpExecutorConfig::default())
    }

    pub fn with_config(config: HttpExecutorConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(config.user_agent.clone())
            .build()?;

        info!(
            timeout_secs = config.timeout.as_secs(),
            connect_timeout_secs = config.connect_timeout.as_secs(),
            "HttpExecutor initialized"
        );

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpExecutorConfig {
        &self.config
    }

    /// Turn a job into a ready-to-send request. Errors describe why the job
    /// can never succeed (bad method, URL or header).
    pub fn build_request(&self, job: &HttpJob) -> Result<reqwest::RequestBuilder, String> {
        let method = Method::from_bytes(job.effective_method().as_bytes())
            .map_err(|_| format!("invalid method {:?}", job.effective_method()))?;
        let url = Url::parse(&job.url).map_err(|e| format!("invalid url {:?}: {}", job.url, e))?;

        let mut headers = HeaderMap::with_capacity(job.headers.len());
        for (name, value) in &job.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| format!("invalid header name {:?}", name))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| format!("invalid value for header {}", name))?;
            headers.insert(name, value);
        }

        let placement = parameter_placement(&method, !job.body.is_empty());
        let mut request = self.client.request(method, url).headers(headers);

        if !job.parameters.is_empty() {
            request = match placement {
                ParameterPlacement::Query => request.query(&job.parameters),
                ParameterPlacement::FormBody => request.form(&job.parameters),
            };
        }
        if !job.body.is_empty() {
            request = request.body(job.body.clone());
        }

        Ok(request)
    }

    async fn execute_http(&self, job: &HttpJob) -> JobOutcome {
        let request = match self.build_request(job) {
            Ok(r) => r,
            Err(message) => {
                warn!(url = %job.url, error = %message, "Rejected invalid job");
                return JobOutcome::error_request(message);
            }
        };

        debug!(
            url = %job.url,
            method = job.effective_method(),
            headers = job.headers.len(),
            parameters = job.parameters.len(),
            body_bytes = job.body.len(),
            "Executing job"
        );

        let mut response = match request.send().await {
            Ok(response) => response,
            Err(e) => return classify_error(&job.url, &e),
        };
        let status = response.status();

        // the job only completes once the body is in; chunks are discarded
        loop {
            match response.chunk().await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => return classify_error(&job.url, &e),
            }
        }

        if status.is_success() {
            debug!(url = %job.url, status_code = status.as_u16(), "Job succeeded");
            JobOutcome::success(status.as_u16())
        } else {
            warn!(url = %job.url, status_code = status.as_u16(), "Job got non-2xx response");
            JobOutcome::error_status(status.as_u16())
        }
    }
}

/// Map a send or body-read failure to its outcome
fn classify_error(url: &str, e: &reqwest::Error) -> JobOutcome {
    if e.is_timeout() {
        warn!(url = %url, error = %e, "Job request timed out");
        JobOutcome::error_timeout(format!("Request timeout: {}", e))
    } else if e.is_connect() {
        warn!(url = %url, error = %e, "Job connection failed");
        JobOutcome::error_connection(format!("Connection error: {}", e))
    } else if e.is_builder() {
        warn!(url = %url, error = %e, "Job request could not be built");
        JobOutcome::error_request(format!("Invalid request: {}", e))
    } else {
        warn!(
            url = %url,
            error = %e,
            is_request = e.is_request(),
            is_body = e.is_body(),
            is_decode = e.is_decode(),
            is_redirect = e.is_redirect(),
            "Job request failed"
        );
        JobOutcome::error_connection(format!("Request failed: {}", e))
    }
}

#[async_trait]
impl JobExecutor for HttpExecutor {
    async fn execute(&self, job: &Job) -> JobOutcome {
        match job {
            Job::Http(http) => self.execute_http(http).await,
        }
    }
}

/// Registry with the HTTP executor under its kind tag
pub fn default_registry(executor: Arc<HttpExecutor>) -> ExecutorRegistry {
    ExecutorRegistry::new().with(HTTP_JOB_KIND, executor)
}
