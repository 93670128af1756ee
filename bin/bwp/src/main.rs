//! bwp server
//!
//! Accepts HTTP jobs on `POST /post/http` and executes them on a fixed
//! worker pool behind a bounded queue.
//!
//! ## Signals
//!
//! - **SIGUSR2**: spawn a successor that inherits every listening socket.
//!   The successor sends SIGTERM to this process once it is serving.
//! - **SIGTERM / Ctrl-C**: stop accepting, finish in-flight requests and
//!   running jobs, discard queued jobs and exit.
//!
//! Configuration is read from `config.toml` (or `BWP_CONFIG`) with `BWP_*`
//! environment overrides; see `bwp_config::AppConfig`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use bwp_config::{AppConfig, ConfigLoader};
use bwp_dispatch::api::{create_router_with_options, AppState, RouterOptions};
use bwp_dispatch::{
    default_registry, HttpExecutor, HttpExecutorConfig, LifecycleConfig, LifecycleManager,
    WorkerPool, WorkerPoolConfig,
};
use bwp_listener::{HandoffConfig, ListenerRegistry, RestartController, ServeListener};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    bwp_common::logging::init_logging("bwp");

    let config = ConfigLoader::new().load()?;
    info!(pid = std::process::id(), "Starting bwp");

    // 1. Metrics recorder
    let prometheus = PrometheusBuilder::new().install_recorder()?;

    // 2. Executor and worker pool
    let executor = Arc::new(HttpExecutor::with_config(HttpExecutorConfig {
        timeout: Duration::from_secs(config.executor.timeout_secs),
        connect_timeout: Duration::from_secs(config.executor.connect_timeout_secs),
        pool_max_idle_per_host: config.executor.pool_max_idle_per_host,
        user_agent: config.executor.user_agent.clone(),
    })?);

    let pool = Arc::new(WorkerPool::start(
        WorkerPoolConfig {
            workers: config.pool.workers,
            queue_limit: config.pool.queue_limit,
            execution_timeout: config.pool.execution_timeout(),
            recycle_capacity: config.pool.recycle_capacity,
            shutdown_timeout: config.pool.shutdown_timeout(),
        },
        default_registry(executor),
    ));

    // 3. Background tasks
    let lifecycle = LifecycleManager::start(
        pool.clone(),
        LifecycleConfig {
            gauge_interval: config.lifecycle.gauge_interval(),
            health_report_interval: config.lifecycle.report_interval(),
            saturation_warn_ratio: config.lifecycle.saturation_warn_ratio,
        },
    );

    // 4. Listeners, inherited from a predecessor where addresses match
    let registry = Arc::new(ListenerRegistry::from_env()?);
    let state = AppState::new(pool.clone()).with_prometheus(prometheus);
    let router = create_router_with_options(
        state.clone(),
        RouterOptions {
            request_timeout: config.http.request_timeout(),
            max_body_bytes: config.http.max_body_bytes,
        },
    );

    let (drain_tx, drain_rx) = watch::channel(false);
    let mut servers = Vec::with_capacity(config.http.listen.len());
    for address in &config.http.listen {
        let listener = registry.listen(address)?;
        servers.push(spawn_server(address.clone(), listener, router.clone(), drain_rx.clone()));
    }

    if registry.unclaimed_inherited() > 0 {
        warn!(
            unclaimed = registry.unclaimed_inherited(),
            "Some inherited listeners match no configured address"
        );
    }

    log_startup_summary(&config, &registry);

    // 5. Take over from the predecessor, if any
    if registry.notify_ready()? {
        info!("Predecessor notified; serving on inherited listeners");
    }

    let restart = RestartController::new(
        registry.clone(),
        HandoffConfig {
            ready_timeout: config.restart.ready_timeout(),
            ..Default::default()
        },
    );

    wait_for_shutdown(&restart, config.restart.enabled).await?;

    // 6. Drain: stop accepting, finish in-flight requests
    state.draining.store(true, Ordering::SeqCst);
    registry.mark_draining();
    let _ = drain_tx.send(true);

    let shutdown_timeout = config.pool.shutdown_timeout();
    for (address, server) in servers {
        match tokio::time::timeout(shutdown_timeout, server).await {
            Ok(Ok(Ok(()))) => info!(address = %address, "Server stopped"),
            Ok(Ok(Err(e))) => error!(address = %address, error = %e, "Server failed"),
            Ok(Err(e)) => error!(address = %address, error = %e, "Server task panicked"),
            Err(_) => warn!(address = %address, "Server did not stop within the shutdown timeout"),
        }
    }

    // 7. Finish running jobs, discard queued ones
    let summary = pool.shutdown().await;
    lifecycle.shutdown(shutdown_timeout).await;
    registry.close();

    let metrics = pool.metrics();
    info!(
        discarded = summary.discarded,
        workers_finished = summary.workers_finished,
        accepted = metrics.total_accepted,
        succeeded = metrics.total_succeeded,
        failed = metrics.total_failed,
        rejected = metrics.total_rejected,
        "bwp shutdown complete"
    );
    Ok(())
}

/// Serve `router` on `listener` until the drain flag is raised
fn spawn_server(
    address: String,
    listener: ServeListener,
    router: Router,
    mut drain: watch::Receiver<bool>,
) -> (String, JoinHandle<std::io::Result<()>>) {
    let shutdown = async move {
        let _ = drain.wait_for(|draining| *draining).await;
    };

    let handle = match listener {
        ServeListener::Tcp(listener) => tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
        }),
        ServeListener::Unix(listener) => tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
        }),
    };

    (address, handle)
}

/// Handle restart requests until a shutdown signal arrives
async fn wait_for_shutdown(restart: &RestartController, restart_enabled: bool) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut user2 = signal(SignalKind::user_defined2())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("SIGTERM received, draining");
                return Ok(());
            }
            _ = user2.recv() => {
                if !restart_enabled {
                    warn!("SIGUSR2 received but restarts are disabled");
                    continue;
                }
                match restart.restart() {
                    Ok(pid) => info!(successor_pid = pid, "Restart started, waiting for successor"),
                    Err(e) => warn!(error = %e, "Restart refused"),
                }
            }
        }
    }
}

fn log_startup_summary(config: &AppConfig, registry: &ListenerRegistry) {
    info!("=== bwp Startup Summary ===");
    info!(
        workers = config.pool.workers,
        queue_limit = config.pool.queue_limit,
        "  Pool"
    );
    for (address, state) in registry.states() {
        info!(address = %address, state = ?state, "  Listener");
    }
    if config.restart.enabled {
        info!("  Restart: SIGUSR2 hands listeners to a successor");
    } else {
        info!("  Restart: disabled");
    }
    info!("===========================");
}
