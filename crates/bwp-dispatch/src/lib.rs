//! bwp job dispatch
//!
//! This crate provides the background job pipeline with:
//! - JobRecycler: bounded free list of reusable job values
//! - BoundedJobQueue: non-blocking admission into a fixed-capacity FIFO
//! - WorkerPool: fixed set of persistent workers with live counters
//! - HttpExecutor: one outbound request per job, outcome logged and counted
//! - LifecycleManager: gauge publishing and periodic health reports
//! - PoolMetricsCollector: totals and duration percentiles
//! - API: job submission, status, health and metrics endpoints

pub mod error;
pub mod recycler;
pub mod queue;
pub mod pool;
pub mod executor;
pub mod lifecycle;
pub mod dispatch_metrics;
pub mod metrics;
pub mod api;

pub use error::PoolError;
pub use recycler::JobRecycler;
pub use queue::{BoundedJobQueue, Rejected};
pub use pool::{WorkerPool, WorkerPoolConfig, ShutdownSummary};
pub use executor::{
    JobExecutor, ExecutorRegistry, HttpExecutor, HttpExecutorConfig,
    ParameterPlacement, parameter_placement, default_registry,
};
pub use lifecycle::{LifecycleManager, LifecycleConfig};
pub use crate::metrics::{PoolMetricsCollector, MetricsConfig};

pub type Result<T> = std::result::Result<T, PoolError>;
