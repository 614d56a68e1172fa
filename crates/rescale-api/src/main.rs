//! Axum API server binary.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use rescale_api::{create_router, metrics, ApiConfig, AppState};
use rescale_queue::{JobRepository, JobService, QueueConfig};
use rescale_storage::StorageConfig;
use rescale_worker::{build_context, connect_jobs, init_tracing, QueueBackend, Scheduler, WorkerConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for TLS to Redis and S3)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    init_tracing("rescale=info");

    info!("Starting rescale-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    if let Err(e) = run(config).await {
        error!("API server error: {}", e);
        std::process::exit(1);
    }

    info!("Server shutdown complete");
}

async fn run(config: ApiConfig) -> Result<(), BoxError> {
    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics()?)
    } else {
        None
    };

    let backend = QueueBackend::from_env()?;
    let worker_config = WorkerConfig::from_env();
    let queue_config = QueueConfig {
        max_concurrent_jobs: worker_config.max_concurrent_jobs as u64,
        ..QueueConfig::from_env()
    };
    let (store, queue) = connect_jobs(backend, queue_config).await?;
    let repo = Arc::new(JobRepository::new(store));
    let jobs = JobService::new(Arc::clone(&repo), Arc::clone(&queue));

    let storage = StorageConfig::from_env()?.build()?;

    // Nothing else can drain a process-local queue
    let embedded = if config.embed_worker || backend == QueueBackend::Memory {
        let ctx = Arc::new(build_context(worker_config, repo, queue).await?);
        Some(spawn_scheduler(Scheduler::new(ctx)))
    } else {
        None
    };

    let addr = config.bind_address();
    let app = create_router(AppState::new(config, jobs, storage), metrics_handle);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some((shutdown, task)) = embedded {
        info!("Stopping embedded worker");
        shutdown.send_replace(true);
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Embedded worker error: {}", e),
            Err(e) => error!("Embedded worker task failed: {}", e),
        }
    }

    Ok(())
}

fn spawn_scheduler(
    scheduler: Scheduler,
) -> (
    tokio::sync::watch::Sender<bool>,
    JoinHandle<rescale_worker::WorkerResult<()>>,
) {
    info!("Running worker in-process");
    let shutdown = scheduler.shutdown_handle();
    let task = tokio::spawn(async move { scheduler.run().await });
    (shutdown, task)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal");
}
