//! Admission loop.
//!
//! Moves jobs from the FIFO queue into the bounded active set and spawns a
//! job runner for each. Admission is event-driven: the loop waits on a
//! capacity permit, then on a blocking dequeue, and never sleeps on a fixed
//! schedule except after the shared active set refused a job.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use rescale_models::{JobId, JobStatus};

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::job_runner::run_job;
use crate::metrics;

/// Grace period for runners to record their outcome after encoders were
/// cancelled.
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Event-driven admission from the queue into the active set.
pub struct Scheduler {
    ctx: Arc<WorkerContext>,
    permits: Arc<Semaphore>,
    capacity: u32,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        let capacity = ctx.config.max_concurrent_jobs.max(1);
        let (shutdown, _) = watch::channel(false);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity: capacity as u32,
            ctx,
            shutdown,
        }
    }

    /// Sender that stops the loop when set to `true`.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run until shutdown, then wait for in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting scheduler with {} max concurrent jobs",
            self.capacity
        );

        let recovered = self.recover().await?;
        if recovered > 0 {
            info!("Re-dispatched {} interrupted job(s)", recovered);
        }

        let reconcile_task = self.spawn_reconciler();
        let mut shutdown_rx = self.shutdown.subscribe();

        while !self.is_shutting_down() {
            let permit = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                permit = Arc::clone(&self.permits).acquire_owned() => permit
                    .map_err(|_| WorkerError::config_error("scheduler semaphore closed"))?,
            };

            // Not raced against shutdown: a dropped BRPOP could lose the id
            let next = match self.ctx.queue.wait_dequeue(self.ctx.config.poll_timeout).await {
                Ok(next) => next,
                Err(e) => {
                    error!("Dequeue failed: {}", e);
                    drop(permit);
                    self.pause(&mut shutdown_rx).await;
                    continue;
                }
            };

            let Some(job_id) = next else {
                continue;
            };

            if self.is_shutting_down() {
                self.requeue(&job_id).await;
                break;
            }

            self.admit(job_id, permit, &mut shutdown_rx).await;
        }

        info!("Shutdown signal received, stopping admissions");
        reconcile_task.abort();
        self.drain().await;
        info!("Scheduler stopped");
        Ok(())
    }

    /// Activate a dequeued job and hand it to a runner.
    async fn admit(
        &self,
        job_id: JobId,
        permit: OwnedSemaphorePermit,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        match self.ctx.queue.try_activate(&job_id).await {
            Ok(true) => {}
            Ok(false) => {
                info!(job_id = %job_id, "Active set full, returning job to the queue");
                drop(permit);
                self.requeue(&job_id).await;
                if let Err(e) = reconcile(&self.ctx).await {
                    warn!("Reconciliation failed: {}", e);
                }
                self.pause(shutdown_rx).await;
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, "Activation failed: {}", e);
                drop(permit);
                self.requeue(&job_id).await;
                self.pause(shutdown_rx).await;
                return;
            }
        }

        let admitted = self
            .ctx
            .repo
            .update(&job_id, |job| {
                if job.status != JobStatus::Waiting {
                    return Ok(Some(job.status));
                }
                job.admit()?;
                Ok(None)
            })
            .await;

        match admitted {
            Ok((None, _)) => {
                debug!(job_id = %job_id, "Job admitted");
                self.dispatch(job_id, permit);
            }
            Ok((Some(status), _)) if status.is_terminal() => {
                warn!(job_id = %job_id, status = %status, "Dropping queue entry of finished job");
                self.deactivate(&job_id).await;
            }
            Ok((Some(status), _)) => {
                // Another runner owns the slot
                warn!(job_id = %job_id, status = %status, "Ignoring duplicate queue entry");
            }
            Err(e) if e.is_not_found() => {
                warn!(job_id = %job_id, "Dropping queue entry without a job record");
                self.deactivate(&job_id).await;
            }
            Err(e) => {
                error!(job_id = %job_id, "Failed to admit job: {}", e);
                drop(permit);
                self.deactivate(&job_id).await;
                self.requeue(&job_id).await;
                self.pause(shutdown_rx).await;
            }
        }
    }

    fn dispatch(&self, job_id: JobId, permit: OwnedSemaphorePermit) {
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            let _permit = permit;
            run_job(ctx, job_id).await;
        });
    }

    /// Start-up sweep: purge stale entries, then re-dispatch jobs that were
    /// active when the previous process stopped.
    pub async fn recover(&self) -> WorkerResult<usize> {
        reconcile(&self.ctx).await?;

        let mut recovered = 0;
        for job_id in self.ctx.queue.active_members().await? {
            let Some(job) = self.ctx.repo.find(&job_id).await? else {
                continue;
            };
            if job.is_terminal() {
                continue;
            }
            if job.status == JobStatus::Waiting {
                self.ctx
                    .repo
                    .update(&job_id, |job| {
                        job.admit()?;
                        Ok(())
                    })
                    .await?;
            }

            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::config_error("scheduler semaphore closed"))?;
            info!(job_id = %job_id, status = %job.status, "Recovering interrupted job");
            self.dispatch(job_id, permit);
            recovered += 1;
        }
        Ok(recovered)
    }

    fn spawn_reconciler(&self) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let mut shutdown_rx = self.shutdown.subscribe();
        let period = self.ctx.config.reconcile_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The start-up sweep already ran
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reconcile(&ctx).await {
                            warn!("Reconciliation failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// Wait for in-flight jobs; cancel encoders after the shutdown timeout.
    async fn drain(&self) {
        let in_flight = self.capacity as usize - self.permits.available_permits();
        if in_flight > 0 {
            info!("Waiting for {} in-flight job(s) to complete...", in_flight);
        }

        let all = self.permits.acquire_many(self.capacity);
        tokio::pin!(all);
        if tokio::time::timeout(self.ctx.config.shutdown_timeout, &mut all)
            .await
            .is_ok()
        {
            return;
        }

        warn!(
            "Jobs still running after {:?}, cancelling encoders",
            self.ctx.config.shutdown_timeout
        );
        self.ctx.cancel_encoders();
        if tokio::time::timeout(CANCEL_GRACE, &mut all).await.is_err() {
            warn!("Jobs did not stop after cancellation");
        }
    }

    async fn pause(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(self.ctx.config.poll_timeout) => {}
        }
    }

    async fn requeue(&self, job_id: &JobId) {
        if let Err(e) = self.ctx.queue.requeue(job_id).await {
            error!(job_id = %job_id, "Failed to return job to the queue: {}", e);
        }
    }

    async fn deactivate(&self, job_id: &JobId) {
        if let Err(e) = self.ctx.queue.deactivate(job_id).await {
            warn!(job_id = %job_id, "Failed to release active slot: {}", e);
        }
    }
}

/// Remove active-set entries whose job record is missing or terminal.
///
/// Returns the number of entries purged.
pub async fn reconcile(ctx: &WorkerContext) -> WorkerResult<usize> {
    let mut purged = 0;
    for job_id in ctx.queue.active_members().await? {
        let stale = match ctx.repo.find(&job_id).await? {
            None => true,
            Some(job) => job.is_terminal(),
        };
        if stale {
            ctx.queue.deactivate(&job_id).await?;
            info!(job_id = %job_id, "Purged stale active entry");
            purged += 1;
        }
    }

    let active = ctx.queue.active_count().await?;
    metrics::set_active_jobs(active as usize);
    Ok(purged)
}
