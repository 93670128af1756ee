//! bwp configuration
//!
//! TOML configuration with environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub pool: PoolConfig,
    pub executor: ExecutorConfig,
    pub lifecycle: LifecycleSettings,
    pub restart: RestartConfig,
}

/// HTTP front door configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Addresses to listen on. A leading `/` selects a Unix socket path,
    /// anything else is a TCP4 `host:port` (`:port` binds all interfaces).
    pub listen: Vec<String>,
    /// Upper bound for handling a single API request
    pub request_timeout_secs: u64,
    /// Largest accepted submission body
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: vec!["0.0.0.0:8080".to_string()],
            request_timeout_secs: 10,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of persistent workers
    pub workers: usize,
    /// Maximum number of jobs waiting in the queue
    pub queue_limit: usize,
    /// Safety bound around a single job execution
    pub execution_timeout_secs: u64,
    /// Maximum number of idle job values kept for reuse
    pub recycle_capacity: usize,
    /// How long shutdown waits for running jobs to finish
    pub shutdown_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_limit: 1000,
            execution_timeout_secs: 60,
            recycle_capacity: 1024,
            shutdown_timeout_secs: 30,
        }
    }
}

impl PoolConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Outbound HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Total request timeout per job
    pub timeout_secs: u64,
    /// Connection establishment timeout
    pub connect_timeout_secs: u64,
    /// Idle keep-alive connections kept per downstream host
    pub pool_max_idle_per_host: usize,
    /// User-Agent header sent when the job does not set one
    pub user_agent: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 32,
            user_agent: format!("bwp/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Background task configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Interval for publishing the active-worker and queue-length gauges
    pub gauge_interval_secs: u64,
    /// Interval for the health report
    pub report_interval_secs: u64,
    /// Queue fill ratio above which the health report warns
    pub saturation_warn_ratio: f64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            gauge_interval_secs: 5,
            report_interval_secs: 30,
            saturation_warn_ratio: 0.8,
        }
    }
}

impl LifecycleSettings {
    pub fn gauge_interval(&self) -> Duration {
        Duration::from_secs(self.gauge_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

/// Graceful restart configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Handle SIGUSR2 by spawning a successor that inherits the listeners
    pub enabled: bool,
    /// How long to wait for the successor to report ready before giving up
    pub ready_timeout_secs: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ready_timeout_secs: 30,
        }
    }
}

impl RestartConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration using the default search paths and env overrides
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check values that would leave the server unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.listen.is_empty() {
            return Err(ConfigError::ValidationError(
                "http.listen must contain at least one address".to_string(),
            ));
        }
        if let Some(addr) = self.http.listen.iter().find(|a| a.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "http.listen contains an empty address: {:?}",
                addr
            )));
        }
        if self.http.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "http.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.pool.execution_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "pool.execution_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.executor.timeout_secs == 0 || self.executor.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "executor timeouts must be greater than 0".to_string(),
            ));
        }
        if self.lifecycle.gauge_interval_secs == 0 || self.lifecycle.report_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "lifecycle intervals must be greater than 0".to_string(),
            ));
        }
        let ratio = self.lifecycle.saturation_warn_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "lifecycle.saturation_warn_ratio must be in (0, 1], got {}",
                ratio
            )));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# bwp configuration
# Environment variables (BWP_*) override these settings

[http]
# "/path/to.sock" listens on a Unix socket, anything else is TCP4 host:port
listen = ["0.0.0.0:8080"]
request_timeout_secs = 10
max_body_bytes = 4194304

[pool]
workers = 10
queue_limit = 1000
execution_timeout_secs = 60
recycle_capacity = 1024
shutdown_timeout_secs = 30

[executor]
timeout_secs = 30
connect_timeout_secs = 10
pool_max_idle_per_host = 32

[lifecycle]
gauge_interval_secs = 5
report_interval_secs = 30
saturation_warn_ratio = 0.8

[restart]
enabled = true
ready_timeout_secs = 30
"#
        .to_string()
    }
}
