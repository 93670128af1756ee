//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "bwp.toml",
    "config.toml",
    "./config/bwp.toml",
    "/etc/bwp/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with a custom variable lookup.
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file(&lookup) {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_env_overrides(&mut config, &lookup);
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file<F>(&self, lookup: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured config file does not exist, searching defaults");
        }

        if let Some(path) = lookup("BWP_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_into<T: FromStr, F>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup(key) {
        match val.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key, value = %val, "Ignoring unparseable environment override"),
        }
    }
}

/// Apply `BWP_*` environment variable overrides
fn apply_env_overrides<F>(config: &mut AppConfig, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    // HTTP
    if let Some(val) = lookup("BWP_LISTEN") {
        config.http.listen = val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    parse_into(lookup, "BWP_REQUEST_TIMEOUT_SECS", &mut config.http.request_timeout_secs);
    parse_into(lookup, "BWP_MAX_BODY_BYTES", &mut config.http.max_body_bytes);

    // Pool
    parse_into(lookup, "BWP_WORKERS", &mut config.pool.workers);
    parse_into(lookup, "BWP_QUEUE_LIMIT", &mut config.pool.queue_limit);
    parse_into(lookup, "BWP_EXECUTION_TIMEOUT_SECS", &mut config.pool.execution_timeout_secs);
    parse_into(lookup, "BWP_RECYCLE_CAPACITY", &mut config.pool.recycle_capacity);
    parse_into(lookup, "BWP_SHUTDOWN_TIMEOUT_SECS", &mut config.pool.shutdown_timeout_secs);

    // Executor
    parse_into(lookup, "BWP_EXECUTOR_TIMEOUT_SECS", &mut config.executor.timeout_secs);
    parse_into(lookup, "BWP_EXECUTOR_CONNECT_TIMEOUT_SECS", &mut config.executor.connect_timeout_secs);
    parse_into(lookup, "BWP_EXECUTOR_MAX_IDLE_PER_HOST", &mut config.executor.pool_max_idle_per_host);
    if let Some(val) = lookup("BWP_USER_AGENT") {
        config.executor.user_agent = val;
    }

    // Lifecycle
    parse_into(lookup, "BWP_GAUGE_INTERVAL_SECS", &mut config.lifecycle.gauge_interval_secs);
    parse_into(lookup, "BWP_REPORT_INTERVAL_SECS", &mut config.lifecycle.report_interval_secs);
    parse_into(lookup, "BWP_SATURATION_WARN_RATIO", &mut config.lifecycle.saturation_warn_ratio);

    // Restart
    parse_into(lookup, "BWP_RESTART_ENABLED", &mut config.restart.enabled);
    parse_into(lookup, "BWP_RESTART_READY_TIMEOUT_SECS", &mut config.restart.ready_timeout_secs);
}
