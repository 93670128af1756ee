//! Prometheus-compatible metrics for job admission and execution
//!
//! Recorded through the `metrics` facade; the binary installs the exporter.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

use bwp_common::ExecutionResult;

pub fn record_job_accepted(kind: &str) {
    counter!("bwp.jobs.accepted_total", "kind" => kind.to_string()).increment(1);
}

/// Record a refused submission (`capacity`, `closed`, `unknown_kind`, ...)
pub fn record_job_rejected(reason: &'static str) {
    counter!("bwp.jobs.rejected_total", "reason" => reason).increment(1);
}

pub fn record_job_finished(result: ExecutionResult, duration: Duration) {
    match result {
        ExecutionResult::Success => counter!("bwp.jobs.succeeded_total").increment(1),
        other => counter!("bwp.jobs.failed_total", "reason" => other.as_str()).increment(1),
    }
    histogram!("bwp.jobs.duration_ms").record(duration.as_secs_f64() * 1000.0);
}

pub fn record_jobs_discarded(count: usize) {
    counter!("bwp.jobs.discarded_total").increment(count as u64);
}

pub fn set_active_workers(count: usize) {
    gauge!("bwp.pool.active_workers").set(count as f64);
}

pub fn set_queued_jobs(count: usize) {
    gauge!("bwp.pool.queued_jobs").set(count as f64);
}
