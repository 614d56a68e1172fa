//! Transcoding worker.
//!
//! This crate provides:
//! - The admission loop moving jobs from the queue into the active set
//! - The job runner fanning out one encode per requested resolution
//! - Progress persistence, output publishing and stale-entry recovery
//! - Graceful shutdown with encoder cancellation

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod job_runner;
pub mod logging;
pub mod metrics;
pub mod resolution_worker;
pub mod retry;
pub mod scheduler;

pub use bootstrap::{build_context, connect_jobs, QueueBackend};
pub use config::WorkerConfig;
pub use context::WorkerContext;
pub use error::{WorkerError, WorkerResult};
pub use job_runner::run_job;
pub use logging::{init_tracing, JobLogger};
pub use resolution_worker::convert_resolution;
pub use scheduler::{reconcile, Scheduler};
