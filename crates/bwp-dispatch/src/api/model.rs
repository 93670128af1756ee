use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use bwp_common::{ExecutionMetrics, PoolStats};

/// One HTTP job as submitted to `POST /post/http`. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct HttpJobRequest {
    /// Target URL (required)
    pub url: Option<String>,
    /// HTTP method, GET when absent or empty
    pub method: Option<String>,
    /// Request body, standard base64
    pub body: Option<String>,
    /// Query or form parameters
    pub parameters: Option<HashMap<String, String>>,
    /// Extra request headers
    pub headers: Option<HashMap<String, String>>,
}

/// Response to an accepted submission
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    pub success: bool,
}

/// Error body for refused submissions and other API errors
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,
    pub error: String,
    /// Position of the failing element in a batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Batch elements queued before the failing one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<usize>,
}

/// Simple health response for basic health check
#[derive(Debug, Serialize, ToSchema)]
pub struct SimpleHealthResponse {
    /// UP or DRAINING
    pub status: String,
    pub version: String,
}

/// Probe response
#[derive(Debug, Serialize, ToSchema)]
pub struct ProbeResponse {
    /// LIVE, READY or NOT_READY
    pub status: String,
}

/// Detailed monitoring response
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringResponse {
    pub version: String,
    pub pid: u32,
    pub draining: bool,
    pub pool: PoolStats,
    pub metrics: ExecutionMetrics,
    /// Idle job values held for reuse
    pub recycled_idle: usize,
}
