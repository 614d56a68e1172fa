//! Durable job records.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, warn};

use rescale_models::{Job, JobId};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

/// Durable mapping from job ID to job record.
///
/// Every successful write is visible to the next read; there is no cache.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>>;

    /// Store `job`, replacing any existing record.
    async fn put(&self, job: &Job) -> QueueResult<()>;

    /// Store `job` only if no record exists for its ID.
    ///
    /// Returns [`QueueError::DuplicateJob`] otherwise.
    async fn insert(&self, job: &Job) -> QueueResult<()>;

    /// IDs of all stored jobs, in no particular order.
    async fn list(&self) -> QueueResult<Vec<JobId>>;

    /// Every readable job record.
    async fn load_all(&self) -> QueueResult<Vec<Job>> {
        let mut jobs = Vec::new();
        for id in self.list().await? {
            if let Some(job) = self.get(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}

/// [`JobStore`] keeping each record as JSON under `job:{id}`.
#[derive(Clone)]
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    config: QueueConfig,
}

impl RedisJobStore {
    pub fn new(conn: MultiplexedConnection, config: QueueConfig) -> Self {
        Self { conn, config }
    }

    /// Open a connection using `config.redis_url`.
    pub async fn connect(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self::new(conn, config))
    }

    fn decode(&self, key: &str, raw: &str) -> Option<Job> {
        match serde_json::from_str(raw) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("Skipping unreadable job record {}: {}", key, e);
                None
            }
        }
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.config.job_key(id.as_str())).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(job)?;
        conn.set::<_, _, ()>(self.config.job_key(job.job_id.as_str()), payload)
            .await?;
        Ok(())
    }

    async fn insert(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(job)?;
        let created: bool = conn
            .set_nx(self.config.job_key(job.job_id.as_str()), payload)
            .await?;
        if !created {
            return Err(QueueError::DuplicateJob(job.job_id.to_string()));
        }
        debug!(job_id = %job.job_id, "Inserted job record");
        Ok(())
    }

    async fn list(&self) -> QueueResult<Vec<JobId>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.config.job_key_prefix);
        let mut cursor: u64 = 0;
        let mut ids = Vec::new();

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;

            ids.extend(keys.into_iter().filter_map(|key| {
                key.strip_prefix(&self.config.job_key_prefix)
                    .map(JobId::from)
            }));

            if next == 0 {
                break;
            }
            cursor = next;
        }

        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn load_all(&self) -> QueueResult<Vec<Job>> {
        let ids = self.list().await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.config.job_key(id.as_str())).collect();
        let mut conn = self.conn.clone();
        let mut jobs = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(500) {
            let raws: Vec<Option<String>> = redis::cmd("MGET").arg(chunk.to_vec()).query_async(&mut conn).await?;
            for (key, raw) in chunk.iter().zip(raws) {
                if let Some(job) = raw.and_then(|raw| self.decode(key, &raw)) {
                    jobs.push(job);
                }
            }
        }

        Ok(jobs)
    }
}
