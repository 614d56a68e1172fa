//! Job store, FIFO queue and bounded active set.
//!
//! This crate provides:
//! - Durable job records (`job:{id}` JSON in Redis, or in memory)
//! - The waiting queue and active set, with an atomic capacity check
//! - Per-job serialized read-modify-write via [`JobRepository::update`]
//! - Submission and status operations for the HTTP layer

pub mod config;
pub mod error;
pub mod memory;
pub mod queue;
pub mod repository;
pub mod service;
pub mod store;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use memory::{MemoryJobStore, MemoryWorkQueue};
pub use queue::{RedisWorkQueue, WorkQueue};
pub use repository::JobRepository;
pub use service::JobService;
pub use store::{JobStore, RedisJobStore};

use std::sync::Arc;

/// Redis-backed store and queue sharing one connection.
pub async fn connect_redis(
    config: QueueConfig,
) -> QueueResult<(Arc<dyn JobStore>, Arc<dyn WorkQueue>)> {
    let queue = RedisWorkQueue::connect(config.clone()).await?;
    let store = RedisJobStore::new(queue.connection(), config);
    Ok((Arc::new(store), Arc::new(queue)))
}
