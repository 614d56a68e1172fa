//! Serialized read-modify-write access to job records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use rescale_models::{Job, JobId};

use crate::error::{QueueError, QueueResult};
use crate::store::JobStore;

/// Job store wrapper that serializes writers per job ID.
///
/// All mutation goes through [`JobRepository::update`]: the per-job lock is
/// held while the record is re-read, changed and written back, so two
/// resolutions of one job never overwrite each other's entries. Different
/// jobs do not contend.
pub struct JobRepository {
    store: Arc<dyn JobStore>,
    locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobRepository {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Read a job; missing records are an error.
    pub async fn get(&self, id: &JobId) -> QueueResult<Job> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| QueueError::not_found(id))
    }

    pub async fn find(&self, id: &JobId) -> QueueResult<Option<Job>> {
        self.store.get(id).await
    }

    /// Store a new job; fails with `DuplicateJob` if the ID exists.
    pub async fn insert(&self, job: &Job) -> QueueResult<()> {
        self.store.insert(job).await
    }

    pub async fn load_all(&self) -> QueueResult<Vec<Job>> {
        self.store.load_all().await
    }

    /// Apply `change` to the current record and persist it.
    ///
    /// When `change` returns an error nothing is written. Returns the
    /// closure's value together with the stored record.
    pub async fn update<F, T>(&self, id: &JobId, change: F) -> QueueResult<(T, Job)>
    where
        F: FnOnce(&mut Job) -> QueueResult<T> + Send,
        T: Send,
    {
        let lock = self.lock_for(id)?;
        let result = {
            let _guard = lock.lock().await;
            self.apply(id, change).await
        };
        drop(lock);
        self.release(id);
        result
    }

    async fn apply<F, T>(&self, id: &JobId, change: F) -> QueueResult<(T, Job)>
    where
        F: FnOnce(&mut Job) -> QueueResult<T> + Send,
        T: Send,
    {
        let mut job = self.get(id).await?;
        let value = change(&mut job)?;
        self.store.put(&job).await?;
        Ok((value, job))
    }

    fn lock_for(&self, id: &JobId) -> QueueResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| QueueError::connection_failed("job lock table poisoned"))?;
        Ok(locks.entry(id.clone()).or_default().clone())
    }

    /// Drop the lock entry once no writer holds or waits on it.
    fn release(&self, id: &JobId) {
        if let Ok(mut locks) = self.locks.lock() {
            if locks.get(id).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(id);
                debug!(job_id = %id, "Released job lock");
            }
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryJobStore;
    use rescale_models::{ConversionState, ConversionStatus, JobStatus};
    use std::time::Duration;

    async fn repo_with(job: &Job) -> Arc<JobRepository> {
        let repo = Arc::new(JobRepository::new(Arc::new(MemoryJobStore::new())));
        repo.insert(job).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let repo = JobRepository::new(Arc::new(MemoryJobStore::new()));
        let err = repo
            .update(&JobId::from("nope"), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(repo.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_change_is_not_written() {
        let job = Job::new(JobId::from("j"), "/in.mp4", vec!["720p".to_string()]);
        let store = Arc::new(MemoryJobStore::new());
        let repo = JobRepository::new(store);
        repo.insert(&job).await.unwrap();

        let err = repo
            .update(&job.job_id, |job| {
                job.progress = 50.0;
                job.transition(JobStatus::Completed)?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition(_)));
        assert_eq!(repo.get(&job.job_id).await.unwrap().progress, 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolution_updates_are_not_lost() {
        let labels: Vec<String> = ["4K", "1080p", "720p", "480p", "360p", "240p", "144p"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let job = Job::new(JobId::from("race"), "/in.mp4", labels.clone());
        let repo = repo_with(&job).await;

        let mut handles = Vec::new();
        for label in labels.clone() {
            let repo = repo.clone();
            let id = job.job_id.clone();
            handles.push(tokio::spawn(async move {
                for step in 1..=5 {
                    repo.update(&id, |job| {
                        job.record_progress(&label, step as f64 * 10.0);
                        Ok(())
                    })
                    .await
                    .unwrap();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                repo.update(&id, |job| {
                    job.record_outcome(ConversionStatus::completed(&label, format!("u/{}", label)));
                    Ok(())
                })
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = repo.get(&job.job_id).await.unwrap();
        assert_eq!(stored.conversions.len(), labels.len());
        for label in &labels {
            let conversion = &stored.conversions[label];
            assert_eq!(conversion.status, ConversionState::Completed);
            assert_eq!(conversion.output_url.as_deref(), Some(format!("u/{}", label).as_str()));
        }
        assert_eq!(stored.progress, 100.0);
        assert_eq!(repo.lock_count(), 0);
    }
}
