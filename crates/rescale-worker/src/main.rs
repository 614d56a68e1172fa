//! Transcoding worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};

use rescale_queue::{JobRepository, QueueConfig};
use rescale_worker::{build_context, connect_jobs, init_tracing, metrics, QueueBackend, Scheduler, WorkerConfig, WorkerResult};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS to Redis and S3)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing("rescale=info");

    info!("Starting rescale-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Err(e) = run(config).await {
        error!("Worker error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run(config: WorkerConfig) -> WorkerResult<()> {
    if let Some(addr) = metrics_addr() {
        metrics::install_exporter(addr)?;
        info!("Prometheus metrics served on {}", addr);
    }

    let queue_config = QueueConfig {
        max_concurrent_jobs: config.max_concurrent_jobs as u64,
        ..QueueConfig::from_env()
    };
    let (store, queue) = connect_jobs(QueueBackend::from_env()?, queue_config).await?;
    let repo = Arc::new(JobRepository::new(store));

    let ctx = Arc::new(build_context(config, repo, queue).await?);
    let scheduler = Scheduler::new(ctx);

    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        shutdown.send_replace(true);
    });

    scheduler.run().await
}

fn metrics_addr() -> Option<SocketAddr> {
    let raw = std::env::var("WORKER_METRICS_ADDR").ok()?;
    match raw.parse() {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!("Ignoring invalid WORKER_METRICS_ADDR '{}': {}", raw, e);
            None
        }
    }
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
}
