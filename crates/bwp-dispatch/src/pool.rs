//! WorkerPool - fixed set of persistent workers behind a bounded queue
//!
//! - Non-blocking admission: a full or closed queue refuses immediately
//! - Exactly `workers` tasks, each pulling jobs in FIFO order
//! - Lock-free counters for active workers and queued jobs
//! - Shutdown lets running jobs finish and discards what is still queued

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::Receiver;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use bwp_common::{ExecutionMetrics, HttpJob, Job, JobOutcome, PoolStats, HTTP_JOB_KIND};

use crate::dispatch_metrics;
use crate::executor::ExecutorRegistry;
use crate::metrics::PoolMetricsCollector;
use crate::queue::{BoundedJobQueue, Rejected};
use crate::recycler::JobRecycler;
use crate::{PoolError, Result};

/// Sizing and timing of a worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub queue_limit: usize,
    /// Upper bound on a single execution, on top of the executor's own timeout
    pub execution_timeout: Duration,
    /// Idle `HttpJob` values kept for reuse
    pub recycle_capacity: usize,
    /// How long `shutdown` waits for running jobs
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_limit: 1000,
            execution_timeout: Duration::from_secs(60),
            recycle_capacity: 1024,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// What `shutdown` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Queued jobs dropped without running
    pub discarded: usize,
    /// False when the shutdown timeout expired with jobs still running
    pub workers_finished: bool,
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<BoundedJobQueue>,
    executors: Arc<ExecutorRegistry>,
    recycler: Arc<JobRecycler>,
    metrics_collector: Arc<PoolMetricsCollector>,

    /// Workers currently executing a job
    active_workers: Arc<AtomicUsize>,

    /// Cleared once by `shutdown`
    running: Arc<AtomicBool>,

    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create the pool and spawn its workers. Must run inside a Tokio runtime.
    pub fn start(config: WorkerPoolConfig, executors: ExecutorRegistry) -> Self {
        Self::start_with_metrics(config, executors, Arc::new(PoolMetricsCollector::new()))
    }

    pub fn start_with_metrics(
        config: WorkerPoolConfig,
        executors: ExecutorRegistry,
        metrics_collector: Arc<PoolMetricsCollector>,
    ) -> Self {
        let pool = Self {
            queue: Arc::new(BoundedJobQueue::new(config.queue_limit)),
            executors: Arc::new(executors),
            recycler: Arc::new(JobRecycler::new(config.recycle_capacity)),
            metrics_collector,
            active_workers: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(true)),
            handles: Mutex::new(Vec::with_capacity(config.workers)),
            config,
        };

        let handles: Vec<JoinHandle<()>> = (0..pool.config.workers)
            .map(|id| pool.spawn_worker(id))
            .collect();
        *pool.handles.lock() = handles;

        info!(
            workers = pool.config.workers,
            queue_limit = pool.config.queue_limit,
            kinds = ?pool.executors.kinds(),
            "Worker pool started"
        );

        pool
    }

    fn spawn_worker(&self, id: usize) -> JoinHandle<()> {
        let rx = self.queue.receiver();
        let executors = self.executors.clone();
        let recycler = self.recycler.clone();
        let active_workers = self.active_workers.clone();
        let running = self.running.clone();
        let metrics_collector = self.metrics_collector.clone();
        let execution_timeout = self.config.execution_timeout;

        tokio::spawn(async move {
            Self::run_worker(
                id,
                rx,
                executors,
                recycler,
                active_workers,
                running,
                metrics_collector,
                execution_timeout,
            )
            .await;
        })
    }

    /// Worker loop: wait for a job, execute it, recycle it. Exits once the
    /// queue is closed and empty.
    #[allow(clippy::too_many_arguments)]
    async fn run_worker(
        id: usize,
        rx: Receiver<Job>,
        executors: Arc<ExecutorRegistry>,
        recycler: Arc<JobRecycler>,
        active_workers: Arc<AtomicUsize>,
        running: Arc<AtomicBool>,
        metrics_collector: Arc<PoolMetricsCollector>,
        execution_timeout: Duration,
    ) {
        debug!(worker = id, "Worker started");

        while let Ok(job) = rx.recv().await {
            // dequeued after shutdown began: discard instead of running
            if !running.load(Ordering::SeqCst) {
                recycler.release_job(job);
                metrics_collector.record_discarded(1);
                dispatch_metrics::record_jobs_discarded(1);
                continue;
            }

            let Some(executor) = executors.get(job.kind()).cloned() else {
                error!(worker = id, kind = job.kind(), "No executor for queued job");
                recycler.release_job(job);
                continue;
            };

            active_workers.fetch_add(1, Ordering::SeqCst);
            let start = Instant::now();

            let execution = AssertUnwindSafe(executor.execute(&job)).catch_unwind();
            let outcome = match tokio::time::timeout(execution_timeout, execution).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => {
                    error!(worker = id, kind = job.kind(), "Executor panicked");
                    JobOutcome::error_request("executor panicked".to_string())
                }
                Err(_) => {
                    warn!(
                        worker = id,
                        kind = job.kind(),
                        timeout_secs = execution_timeout.as_secs(),
                        "Job exceeded execution timeout"
                    );
                    JobOutcome::error_timeout(format!(
                        "execution exceeded {}s",
                        execution_timeout.as_secs()
                    ))
                }
            };

            let elapsed = start.elapsed();
            active_workers.fetch_sub(1, Ordering::SeqCst);

            let duration_ms = elapsed.as_millis() as u64;
            if outcome.is_success() {
                metrics_collector.record_success(duration_ms);
            } else {
                metrics_collector.record_failure(duration_ms);
            }
            dispatch_metrics::record_job_finished(outcome.result, elapsed);

            debug!(
                worker = id,
                result = outcome.result.as_str(),
                status_code = ?outcome.status_code,
                duration_ms = duration_ms,
                "Job finished"
            );

            recycler.release_job(job);
        }

        debug!(worker = id, "Worker exited");
    }

    /// Producer entry point. Never waits: the job is queued or refused.
    /// A refused job goes back to the recycler.
    pub fn add_job(&self, kind: &str, job: Job) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(self.refuse(PoolError::Closed, job));
        }
        if !self.executors.contains(kind) {
            return Err(self.refuse(PoolError::UnknownJobKind(kind.to_string()), job));
        }
        if job.kind() != kind {
            let reason = PoolError::KindMismatch {
                requested: kind.to_string(),
                actual: job.kind(),
            };
            return Err(self.refuse(reason, job));
        }

        match self.queue.try_enqueue(job) {
            Ok(()) => {
                self.metrics_collector.record_accepted();
                dispatch_metrics::record_job_accepted(kind);
                Ok(())
            }
            Err(Rejected { reason, job }) => Err(self.refuse(reason, job)),
        }
    }

    /// Shorthand for `add_job("http", ...)`
    pub fn add_http_job(&self, job: HttpJob) -> Result<()> {
        self.add_job(HTTP_JOB_KIND, Job::Http(job))
    }

    fn refuse(&self, reason: PoolError, job: Job) -> PoolError {
        debug!(kind = job.kind(), reason = %reason, "Job refused");
        self.recycler.release_job(job);
        self.metrics_collector.record_rejected();
        dispatch_metrics::record_job_rejected(reason.reason());
        reason
    }

    /// Stop accepting, discard queued jobs and wait for running ones.
    /// Running jobs are never cancelled. Calling it again is a no-op.
    pub async fn shutdown(&self) -> ShutdownSummary {
        if !self.running.swap(false, Ordering::SeqCst) {
            return ShutdownSummary {
                discarded: 0,
                workers_finished: true,
            };
        }

        info!(
            active_workers = self.active_workers(),
            queued_jobs = self.queue_length(),
            "Shutting down worker pool"
        );

        self.queue.close();

        let mut discarded = 0;
        while let Some(job) = self.queue.try_dequeue() {
            self.recycler.release_job(job);
            discarded += 1;
        }
        if discarded > 0 {
            self.metrics_collector.record_discarded(discarded as u64);
            dispatch_metrics::record_jobs_discarded(discarded);
            warn!(discarded = discarded, "Discarded queued jobs at shutdown");
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        let workers_finished = tokio::time::timeout(
            self.config.shutdown_timeout,
            futures::future::join_all(handles),
        )
        .await
        .is_ok();

        if workers_finished {
            info!("Worker pool stopped");
        } else {
            warn!(
                still_active = self.active_workers(),
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Workers still running after shutdown timeout"
            );
        }

        ShutdownSummary {
            discarded,
            workers_finished,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_limit(&self) -> usize {
        self.config.queue_limit
    }

    pub fn workers(&self) -> usize {
        self.config.workers
    }

    pub fn recycler(&self) -> &Arc<JobRecycler> {
        &self.recycler
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_limit: self.queue_limit(),
            workers: self.workers(),
            active_workers: self.active_workers(),
            jobs_in_queue: self.queue_length(),
        }
    }

    pub fn metrics(&self) -> ExecutionMetrics {
        self.metrics_collector.get_metrics()
    }

    pub fn metrics_collector(&self) -> &Arc<PoolMetricsCollector> {
        &self.metrics_collector
    }
}
