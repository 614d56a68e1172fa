//! FIFO queue of waiting jobs plus the bounded active set.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use rescale_models::JobId;

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

/// Adds a member to the active set only while the set is below capacity.
///
/// KEYS[1] = active set, ARGV[1] = job id, ARGV[2] = capacity.
/// Re-activating a member that is already present succeeds.
const TRY_ACTIVATE_LUA: &str = r#"
if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 1 then
    return 1
end
if redis.call('SCARD', KEYS[1]) < tonumber(ARGV[2]) then
    redis.call('SADD', KEYS[1], ARGV[1])
    return 1
end
return 0
"#;

/// Queue & active set contract.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append to the tail; returns the queue length after the push.
    async fn enqueue(&self, id: &JobId) -> QueueResult<u64>;

    /// Remove the oldest waiting ID.
    async fn dequeue(&self) -> QueueResult<Option<JobId>>;

    /// Like [`WorkQueue::dequeue`], waiting up to `timeout` for an ID.
    async fn wait_dequeue(&self, timeout: Duration) -> QueueResult<Option<JobId>>;

    /// Put an ID back at the dequeue end so it is taken next.
    async fn requeue(&self, id: &JobId) -> QueueResult<()>;

    /// Add to the active set iff it holds fewer than `max_active()` members.
    async fn try_activate(&self, id: &JobId) -> QueueResult<bool>;

    /// Remove from the active set. Removing an absent ID succeeds.
    async fn deactivate(&self, id: &JobId) -> QueueResult<()>;

    async fn active_count(&self) -> QueueResult<u64>;

    async fn queue_length(&self) -> QueueResult<u64>;

    async fn active_members(&self) -> QueueResult<Vec<JobId>>;

    /// Waiting IDs in dequeue order.
    async fn queued_ids(&self) -> QueueResult<Vec<JobId>>;

    /// Active set capacity.
    fn max_active(&self) -> u64;
}

/// Redis-backed [`WorkQueue`]: list `job_queue` (LPUSH/RPOP) and set
/// `active_jobs`.
#[derive(Clone)]
pub struct RedisWorkQueue {
    conn: MultiplexedConnection,
    blocking_conn: MultiplexedConnection,
    config: QueueConfig,
    activate: Script,
}

impl RedisWorkQueue {
    /// Open connections using `config.redis_url`.
    ///
    /// Blocking pops get their own connection so they never stall other
    /// commands.
    pub async fn connect(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        let blocking_conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        info!(
            queue = %config.queue_key,
            active_set = %config.active_set_key,
            max_concurrent_jobs = config.max_concurrent_jobs,
            "Connected work queue"
        );

        Ok(Self {
            conn,
            blocking_conn,
            config,
            activate: Script::new(TRY_ACTIVATE_LUA),
        })
    }

    /// Shared connection for the job store.
    pub fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue(&self, id: &JobId) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.lpush(&self.config.queue_key, id.as_str()).await?;
        debug!(job_id = %id, queue_length = len, "Enqueued job");
        Ok(len)
    }

    async fn dequeue(&self) -> QueueResult<Option<JobId>> {
        let mut conn = self.conn.clone();
        let id: Option<String> = redis::cmd("RPOP")
            .arg(&self.config.queue_key)
            .query_async(&mut conn)
            .await?;
        Ok(id.map(JobId::from))
    }

    async fn wait_dequeue(&self, timeout: Duration) -> QueueResult<Option<JobId>> {
        // BRPOP treats 0 as "block forever"
        if timeout.is_zero() {
            return self.dequeue().await;
        }

        let mut conn = self.blocking_conn.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.config.queue_key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, id)| JobId::from(id)))
    }

    async fn requeue(&self, id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(&self.config.queue_key, id.as_str())
            .await?;
        Ok(())
    }

    async fn try_activate(&self, id: &JobId) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = self
            .activate
            .key(&self.config.active_set_key)
            .arg(id.as_str())
            .arg(self.config.max_concurrent_jobs)
            .invoke_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn deactivate(&self, id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(&self.config.active_set_key, id.as_str())
            .await?;
        Ok(())
    }

    async fn active_count(&self) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.scard(&self.config.active_set_key).await?)
    }

    async fn queue_length(&self) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(&self.config.queue_key).await?)
    }

    async fn active_members(&self) -> QueueResult<Vec<JobId>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(&self.config.active_set_key).await?;
        Ok(members.into_iter().map(JobId::from).collect())
    }

    async fn queued_ids(&self) -> QueueResult<Vec<JobId>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.lrange(&self.config.queue_key, 0, -1).await?;
        // LPUSH puts the newest at the head; RPOP takes from the tail
        Ok(ids.into_iter().rev().map(JobId::from).collect())
    }

    fn max_active(&self) -> u64 {
        self.config.max_concurrent_jobs
    }
}
