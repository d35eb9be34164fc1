//! Job executor: the worker loop over the task stream.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mforge_queue::{Dispatcher, JobQueue, QueueJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::retry::FailureTracker;
use crate::runner::TaskRunner;

/// Due retries moved into the stream per promotion tick.
const PROMOTE_BATCH: usize = 100;

/// Consumes task messages and runs them with bounded concurrency.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    runner: Arc<TaskRunner>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<JobQueue>, runner: Arc<TaskRunner>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            runner,
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Run until [`JobExecutor::shutdown`] is called.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let visibility = self.queue.config().visibility_timeout;
        if self.config.heartbeat_interval >= visibility {
            warn!(
                "Heartbeat interval {:?} is not below the visibility timeout {:?}; long attempts may be claimed twice",
                self.config.heartbeat_interval, visibility
            );
        }

        let maintenance = tokio::spawn(Self::maintenance_loop(
            self.config.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.runner),
            Arc::clone(&self.job_semaphore),
            self.consumer_name.clone(),
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping executor");
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        maintenance.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout of {:?} reached with jobs still running",
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Promote due retries and reclaim messages orphaned by dead workers.
    async fn maintenance_loop(
        config: WorkerConfig,
        queue: Arc<JobQueue>,
        runner: Arc<TaskRunner>,
        semaphore: Arc<Semaphore>,
        consumer_name: String,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut promote = tokio::time::interval(config.promote_interval);
        let mut claim = tokio::time::interval(config.claim_interval);
        let mut promote_failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = promote.tick() => {
                    match queue.promote_due(PROMOTE_BATCH).await {
                        Ok(moved) => {
                            promote_failures.record_success();
                            if moved > 0 {
                                debug!(moved, "Promoted due retries");
                            }
                        }
                        Err(e) => {
                            if promote_failures.record_failure() {
                                warn!("Failed to promote delayed retries: {}", e);
                            }
                        }
                    }
                }
                _ = claim.tick() => {
                    let available = semaphore.available_permits();
                    if available == 0 {
                        continue;
                    }
                    match queue.claim_pending(&consumer_name, available).await {
                        Ok(jobs) if !jobs.is_empty() => {
                            info!("Claimed {} pending jobs", jobs.len());
                            for (message_id, job) in jobs {
                                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                    return;
                                };
                                let runner = Arc::clone(&runner);
                                let queue = Arc::clone(&queue);
                                let consumer = consumer_name.clone();
                                let heartbeat = config.heartbeat_interval;
                                tokio::spawn(async move {
                                    let _permit = permit;
                                    Self::execute_job(runner, queue, consumer, heartbeat, message_id, job).await;
                                });
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to claim pending jobs: {}", e),
                    }
                }
            }
        }
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::internal("Semaphore closed"))?;
            let runner = Arc::clone(&self.runner);
            let queue = Arc::clone(&self.queue);
            let consumer = self.consumer_name.clone();
            let heartbeat = self.config.heartbeat_interval;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(runner, queue, consumer, heartbeat, message_id, job).await;
            });
        }

        Ok(())
    }

    /// Run one message while keeping it owned, then release the task claim
    /// and ack.
    async fn execute_job(
        runner: Arc<TaskRunner>,
        queue: Arc<JobQueue>,
        consumer_name: String,
        heartbeat: Duration,
        message_id: String,
        job: QueueJob,
    ) {
        let task_id = job.task_id;
        let (queue_ref, consumer, message) = (&*queue, consumer_name.as_str(), message_id.as_str());
        let outcome = with_heartbeat(runner.execute(&job), heartbeat, move || async move {
            if let Err(e) = queue_ref.heartbeat(consumer, message, task_id).await {
                warn!(task_id = %task_id, "Failed to refresh message ownership: {}", e);
            }
        })
        .await;
        info!(task_id = %task_id, attempt = job.attempt, outcome = outcome.as_str(), "Task attempt finished");

        if !outcome.keeps_claim() {
            if let Err(e) = queue.release(task_id).await {
                warn!(task_id = %task_id, "Failed to release task claim: {}", e);
            }
        }
        if let Err(e) = queue.ack(&message_id).await {
            error!(task_id = %task_id, "Failed to ack message {}: {}", message_id, e);
        }
    }

    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }
}

/// Drive `work` to completion, calling `beat` every `interval` meanwhile.
async fn with_heartbeat<T, W, B, F>(work: W, interval: Duration, mut beat: B) -> T
where
    W: Future<Output = T>,
    B: FnMut() -> F,
    F: Future<Output = ()>,
{
    tokio::pin!(work);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = ticker.tick() => beat().await,
        }
    }
}
