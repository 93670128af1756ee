//! Lifecycle Manager - Background tasks for the worker pool
//!
//! Handles:
//! - Publishing pool gauges (active workers, queued jobs)
//! - Periodic health report with a queue saturation warning
//! - Graceful shutdown coordination

use std::sync::Arc;
use std::time::Duration;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use bwp_common::PoolStats;
use crate::dispatch_metrics;
use crate::pool::WorkerPool;

/// Configuration for the lifecycle manager
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Interval for gauge publishing
    pub gauge_interval: Duration,
    /// Interval for the health report
    pub health_report_interval: Duration,
    /// Queue fill ratio above which the health report warns
    pub saturation_warn_ratio: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            gauge_interval: Duration::from_secs(5),
            health_report_interval: Duration::from_secs(30),
            saturation_warn_ratio: 0.8,
        }
    }
}

/// Queue fill level relative to the limit; a zero limit counts as saturated.
pub fn queue_saturation(stats: &PoolStats) -> f64 {
    if stats.queue_limit == 0 {
        return 1.0;
    }
    stats.jobs_in_queue as f64 / stats.queue_limit as f64
}

/// Manages lifecycle tasks for the worker pool
pub struct LifecycleManager {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LifecycleManager {
    /// Start all lifecycle tasks
    pub fn start(pool: Arc<WorkerPool>, config: LifecycleConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks = Vec::with_capacity(2);

        // Gauge publisher
        {
            let pool = pool.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.gauge_interval;

            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            dispatch_metrics::set_active_workers(pool.active_workers());
                            dispatch_metrics::set_queued_jobs(pool.queue_length());
                        }
                        _ = shutdown_rx.recv() => {
                            debug!("Gauge publisher shutting down");
                            break;
                        }
                    }
                }
            }));
        }

        // Health report logger
        {
            let pool = pool.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.health_report_interval;
            let warn_ratio = config.saturation_warn_ratio;

            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // the first tick fires immediately
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let stats = pool.stats();
                            let metrics = pool.metrics();
                            let saturation = queue_saturation(&stats);

                            if stats.queue_limit > 0 && saturation >= warn_ratio {
                                warn!(
                                    jobs_in_queue = stats.jobs_in_queue,
                                    queue_limit = stats.queue_limit,
                                    active_workers = stats.active_workers,
                                    workers = stats.workers,
                                    rejected = metrics.total_rejected,
                                    "Job queue near capacity"
                                );
                            } else {
                                info!(
                                    jobs_in_queue = stats.jobs_in_queue,
                                    active_workers = stats.active_workers,
                                    accepted = metrics.total_accepted,
                                    succeeded = metrics.total_succeeded,
                                    failed = metrics.total_failed,
                                    rejected = metrics.total_rejected,
                                    "Health report"
                                );
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            debug!("Health report logger shutting down");
                            break;
                        }
                    }
                }
            }));
        }

        info!("Lifecycle manager started with all background tasks");

        Self {
            shutdown_tx,
            tasks: Mutex::new(tasks),
        }
    }

    /// Stop all lifecycle tasks and wait up to `timeout` for them to exit.
    ///
    /// Returns false if a task was still running when the timeout expired.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!("Lifecycle manager shutting down");
        let _ = self.shutdown_tx.send(());

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        match tokio::time::timeout(timeout, join_all(tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "Lifecycle task failed");
                    }
                }
                true
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Lifecycle tasks did not stop in time"
                );
                false
            }
        }
    }
}
