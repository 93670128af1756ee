//! In-process execution metrics
//!
//! All-time totals plus a bounded window of recent execution durations for
//! percentile calculations. Safe for concurrent use by every worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::RwLock;

use bwp_common::{ExecutionMetrics, ExecutionTimeMetrics};

/// Configuration for the metrics collector
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Maximum duration samples retained for percentiles
    pub max_samples: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { max_samples: 10000 }
    }
}

pub struct PoolMetricsCollector {
    config: MetricsConfig,

    total_accepted: AtomicU64,
    total_rejected: AtomicU64,
    total_succeeded: AtomicU64,
    total_failed: AtomicU64,
    total_discarded: AtomicU64,

    /// Most recent execution durations in milliseconds
    samples: RwLock<VecDeque<u64>>,
}

impl PoolMetricsCollector {
    pub fn new() -> Self {
        Self::with_config(MetricsConfig::default())
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        let capacity = config.max_samples.min(10000);
        Self {
            config,
            total_accepted: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_succeeded: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_discarded: AtomicU64::new(0),
            samples: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record_accepted(&self) {
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.total_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, count: u64) {
        self.total_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_success(&self, duration_ms: u64) {
        self.total_succeeded.fetch_add(1, Ordering::Relaxed);
        self.add_sample(duration_ms);
    }

    pub fn record_failure(&self, duration_ms: u64) {
        self.total_failed.fetch_add(1, Ordering::Relaxed);
        self.add_sample(duration_ms);
    }

    fn add_sample(&self, duration_ms: u64) {
        if self.config.max_samples == 0 {
            return;
        }
        let mut samples = self.samples.write();
        if samples.len() >= self.config.max_samples {
            samples.pop_front();
        }
        samples.push_back(duration_ms);
    }

    pub fn total_accepted(&self) -> u64 {
        self.total_accepted.load(Ordering::Relaxed)
    }

    pub fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::Relaxed)
    }

    pub fn total_succeeded(&self) -> u64 {
        self.total_succeeded.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }

    pub fn total_discarded(&self) -> u64 {
        self.total_discarded.load(Ordering::Relaxed)
    }

    /// Snapshot of totals and duration percentiles
    pub fn get_metrics(&self) -> ExecutionMetrics {
        let total_succeeded = self.total_succeeded();
        let total_failed = self.total_failed();
        let executed = total_succeeded + total_failed;

        let success_rate = if executed > 0 {
            total_succeeded as f64 / executed as f64
        } else {
            1.0
        };

        let durations: Vec<u64> = self.samples.read().iter().copied().collect();

        ExecutionMetrics {
            total_accepted: self.total_accepted(),
            total_rejected: self.total_rejected(),
            total_succeeded,
            total_failed,
            total_discarded: self.total_discarded(),
            success_rate,
            execution_time: Self::calculate_execution_time_metrics(durations),
        }
    }

    fn calculate_execution_time_metrics(mut durations: Vec<u64>) -> ExecutionTimeMetrics {
        if durations.is_empty() {
            return ExecutionTimeMetrics::default();
        }

        durations.sort_unstable();

        let count = durations.len() as u64;
        let sum: u64 = durations.iter().sum();

        ExecutionTimeMetrics {
            avg_ms: sum as f64 / count as f64,
            min_ms: durations[0],
            max_ms: durations[durations.len() - 1],
            p50_ms: Self::percentile(&durations, 50.0),
            p95_ms: Self::percentile(&durations, 95.0),
            p99_ms: Self::percentile(&durations, 99.0),
            sample_count: count,
        }
    }

    /// Nearest-rank percentile over sorted data
    fn percentile(sorted: &[u64], p: f64) -> u64 {
        if sorted.is_empty() {
            return 0;
        }
        let idx = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        self.total_accepted.store(0, Ordering::Relaxed);
        self.total_rejected.store(0, Ordering::Relaxed);
        self.total_succeeded.store(0, Ordering::Relaxed);
        self.total_failed.store(0, Ordering::Relaxed);
        self.total_discarded.store(0, Ordering::Relaxed);
        self.samples.write().clear();
    }
}

impl Default for PoolMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
