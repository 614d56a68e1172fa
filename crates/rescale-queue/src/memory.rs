//! In-process store and queue.
//!
//! Used by tests and by single-binary development runs where no Redis is
//! available. Semantics match the Redis backends.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use rescale_models::{Job, JobId};

use crate::error::{QueueError, QueueResult};
use crate::queue::WorkQueue;
use crate::store::JobStore;

fn poisoned<T>(_: T) -> QueueError {
    QueueError::connection_failed("in-memory state poisoned")
}

/// In-memory [`JobStore`].
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.jobs.lock().map_err(poisoned)?.get(id).cloned())
    }

    async fn put(&self, job: &Job) -> QueueResult<()> {
        self.jobs
            .lock()
            .map_err(poisoned)?
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn insert(&self, job: &Job) -> QueueResult<()> {
        let mut jobs = self.jobs.lock().map_err(poisoned)?;
        if jobs.contains_key(&job.job_id) {
            return Err(QueueError::DuplicateJob(job.job_id.to_string()));
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn list(&self) -> QueueResult<Vec<JobId>> {
        Ok(self.jobs.lock().map_err(poisoned)?.keys().cloned().collect())
    }

    async fn load_all(&self) -> QueueResult<Vec<Job>> {
        Ok(self.jobs.lock().map_err(poisoned)?.values().cloned().collect())
    }
}

/// In-memory [`WorkQueue`].
pub struct MemoryWorkQueue {
    waiting: Mutex<VecDeque<JobId>>,
    active: Mutex<BTreeSet<JobId>>,
    max_active: u64,
    available: Notify,
}

impl MemoryWorkQueue {
    pub fn new(max_active: u64) -> Self {
        Self {
            waiting: Mutex::new(VecDeque::new()),
            active: Mutex::new(BTreeSet::new()),
            max_active,
            available: Notify::new(),
        }
    }

    fn pop(&self) -> QueueResult<Option<JobId>> {
        Ok(self.waiting.lock().map_err(poisoned)?.pop_front())
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue(&self, id: &JobId) -> QueueResult<u64> {
        let len = {
            let mut waiting = self.waiting.lock().map_err(poisoned)?;
            waiting.push_back(id.clone());
            waiting.len() as u64
        };
        self.available.notify_one();
        Ok(len)
    }

    async fn dequeue(&self) -> QueueResult<Option<JobId>> {
        self.pop()
    }

    async fn wait_dequeue(&self, timeout: Duration) -> QueueResult<Option<JobId>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(id) = self.pop()? {
                return Ok(Some(id));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pop();
            }
        }
    }

    async fn requeue(&self, id: &JobId) -> QueueResult<()> {
        self.waiting.lock().map_err(poisoned)?.push_front(id.clone());
        self.available.notify_one();
        Ok(())
    }

    async fn try_activate(&self, id: &JobId) -> QueueResult<bool> {
        let mut active = self.active.lock().map_err(poisoned)?;
        if active.contains(id) {
            return Ok(true);
        }
        if (active.len() as u64) < self.max_active {
            active.insert(id.clone());
            return Ok(true);
        }
        Ok(false)
    }

    async fn deactivate(&self, id: &JobId) -> QueueResult<()> {
        self.active.lock().map_err(poisoned)?.remove(id);
        Ok(())
    }

    async fn active_count(&self) -> QueueResult<u64> {
        Ok(self.active.lock().map_err(poisoned)?.len() as u64)
    }

    async fn queue_length(&self) -> QueueResult<u64> {
        Ok(self.waiting.lock().map_err(poisoned)?.len() as u64)
    }

    async fn active_members(&self) -> QueueResult<Vec<JobId>> {
        Ok(self.active.lock().map_err(poisoned)?.iter().cloned().collect())
    }

    async fn queued_ids(&self) -> QueueResult<Vec<JobId>> {
        Ok(self.waiting.lock().map_err(poisoned)?.iter().cloned().collect())
    }

    fn max_active(&self) -> u64 {
        self.max_active
    }
}
