//! Task runner: executes one queued attempt end to end.
//!
//! An attempt loads the task, skips it if it already settled, moves it to
//! `Processing`, runs the pipeline in a private working directory and
//! publishes the result. Failures are classified once, here: a temporary
//! failure with attempts left schedules a delayed attempt and keeps the
//! task `Processing`; anything else writes `Failed`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, Instrument};

use mforge_media::{OperationRegistry, ProcessorContext};
use mforge_models::result::skipped_result;
use mforge_models::{FileId, Task, TaskId, TaskStatus};
use mforge_queue::{Dispatcher, QueueJob};
use mforge_storage::BlobStore;
use mforge_store::{FileRepository, JobStore, StoreError};

use crate::config::WorkerConfig;
use crate::error::{ErrorKind, WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::materializer::{Materializer, RemoteFetcher};
use crate::pipeline::PipelineComposer;
use crate::publisher::ResultPublisher;
use crate::retry::RetryPolicy;
use crate::signals::ConsistencySignals;

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Result published; carries the stored result payload.
    Completed(Value),
    /// Task had already settled; nothing was changed.
    Skipped(Value),
    /// A follow-up attempt was scheduled.
    RetryScheduled { attempt: u32, delay: Duration },
    /// The task is terminally failed.
    Failed { message: String, kind: ErrorKind },
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::Skipped(_) => "skipped",
            RunOutcome::RetryScheduled { .. } => "retry_scheduled",
            RunOutcome::Failed { .. } => "failed",
        }
    }

    /// Whether the task still has an attempt in flight.
    pub fn keeps_claim(&self) -> bool {
        matches!(self, RunOutcome::RetryScheduled { .. })
    }
}

/// Backends a runner works against.
#[derive(Clone)]
pub struct RunnerDeps {
    pub tasks: Arc<dyn JobStore>,
    pub files: Arc<dyn FileRepository>,
    pub blobs: Arc<dyn BlobStore>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub fetcher: Arc<dyn RemoteFetcher>,
    pub registry: Arc<dyn OperationRegistry>,
}

pub struct TaskRunner {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<dyn Dispatcher>,
    composer: PipelineComposer,
    publisher: ResultPublisher,
    signals: ConsistencySignals,
    policy: RetryPolicy,
    work_dir: PathBuf,
    operation_timeout: Duration,
}

impl TaskRunner {
    pub fn new(deps: RunnerDeps, config: &WorkerConfig, policy: RetryPolicy) -> Self {
        let materializer = Arc::new(Materializer::new(
            Arc::clone(&deps.files),
            Arc::clone(&deps.blobs),
            deps.fetcher,
        ));
        Self {
            composer: PipelineComposer::new(materializer, deps.registry, Arc::clone(&deps.tasks)),
            publisher: ResultPublisher::new(deps.files, deps.blobs),
            signals: ConsistencySignals::new(Arc::clone(&deps.tasks)),
            store: deps.tasks,
            dispatcher: deps.dispatcher,
            policy,
            work_dir: config.work_dir.clone(),
            operation_timeout: config.operation_timeout,
        }
    }

    /// Run one attempt. Never fails; every error is settled on the task.
    pub async fn execute(&self, job: &QueueJob) -> RunOutcome {
        let task = match self.store.get(job.task_id).await {
            Ok(task) => task,
            Err(e) => {
                let logger = JobLogger::unresolved(job.task_id, job.attempt);
                let outcome = self.fail(job, &logger, e.into()).await;
                return self.finish(outcome);
            }
        };

        if task.status.is_terminal() {
            info!(task_id = %task.id, status = %task.status, "Task already settled, skipping");
            return self.finish(RunOutcome::Skipped(skipped_result(task.status)));
        }

        let logger = JobLogger::new(task.id, task.task_type, job.attempt);
        let span = logger.create_span();
        let outcome = self.run_attempt(job, task, &logger).instrument(span).await;
        self.finish(outcome)
    }

    async fn run_attempt(&self, job: &QueueJob, task: Task, logger: &JobLogger) -> RunOutcome {
        logger.log_start(&format!("attempt {} of {}", job.attempt, self.policy.max_attempts));
        self.signals.before_run(&task).await;

        match self.store.set_status(task.id, TaskStatus::Processing, None).await {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { from, .. }) => {
                info!(task_id = %task.id, status = %from, "Task settled before start, skipping");
                return RunOutcome::Skipped(skipped_result(from));
            }
            Err(e) => return self.fail(job, logger, e.into()).await,
        }
        if let Err(e) = self.store.set_progress(task.id, 0.0).await {
            logger.log_warning(&format!("Failed to reset progress: {}", e));
        }

        let attempt_dir = match self.attempt_dir(task.id).await {
            Ok(dir) => dir,
            Err(e) => return self.fail(job, logger, e).await,
        };

        let outcome = match self.process(&task, attempt_dir.path()).await {
            Ok((file_id, payload)) => self.complete(job, file_id, payload, logger).await,
            Err(e) => self.fail(job, logger, e).await,
        };

        if let Err(e) = attempt_dir.close() {
            logger.log_warning(&format!("Failed to remove working directory: {}", e));
        }
        outcome
    }

    async fn attempt_dir(&self, task_id: TaskId) -> WorkerResult<tempfile::TempDir> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("task-{}-", task_id))
            .tempdir_in(&self.work_dir)?;
        Ok(dir)
    }

    /// Plan, run and publish. Returns the new file and the result payload.
    async fn process(&self, task: &Task, dir: &Path) -> WorkerResult<(FileId, Value)> {
        let plan = self.composer.plan(task).await?;
        let ctx = ProcessorContext::new(dir, self.operation_timeout);
        let final_path = self.composer.run(task.id, &plan, &ctx).await?;

        let published = self.publisher.publish(task, &final_path).await;
        let _ = tokio::fs::remove_file(&final_path).await;
        let file_id = published?;
        Ok((file_id, plan.result_payload(file_id)))
    }

    /// Link the published result and settle `Completed` in one write.
    ///
    /// A result that cannot be linked is discarded so no orphan file stays
    /// behind for a task that never references it.
    async fn complete(&self, job: &QueueJob, file_id: FileId, payload: Value, logger: &JobLogger) -> RunOutcome {
        match self.store.complete(job.task_id, file_id, payload.clone()).await {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { from, .. }) => {
                info!(task_id = %job.task_id, status = %from, "Task settled while running, discarding result");
                self.publisher.discard(file_id).await;
                return RunOutcome::Skipped(skipped_result(from));
            }
            Err(e) => {
                logger.log_warning(&format!("Completion write did not land: {}", e));
                if !self.signals.on_success(job.task_id, file_id, &payload).await {
                    self.publisher.discard(file_id).await;
                    return match self.store.get(job.task_id).await {
                        Ok(task) if task.status.is_terminal() => {
                            RunOutcome::Skipped(skipped_result(task.status))
                        }
                        _ => self.fail(job, logger, e.into()).await,
                    };
                }
            }
        }

        logger.log_completion(&format!("result file {}", file_id));
        RunOutcome::Completed(payload)
    }

    async fn fail(&self, job: &QueueJob, logger: &JobLogger, error: WorkerError) -> RunOutcome {
        let kind = error.kind();
        let message = error.to_string();
        logger.log_error(&format!("{} ({})", message, kind.as_str()));

        if let Some(delay) = self.policy.retry_delay(kind, job.attempt) {
            let note = format!(
                "Attempt {} of {} failed, retrying in {}s: {}",
                job.attempt,
                self.policy.max_attempts,
                delay.as_secs(),
                message
            );
            if let Err(e) = self.store.set_error(job.task_id, Some(note)).await {
                logger.log_warning(&format!("Failed to record pending retry: {}", e));
            }

            let next = job.next_attempt();
            let attempt = next.attempt;
            match self.dispatcher.enqueue_delayed(next, delay).await {
                Ok(()) => {
                    info!(task_id = %job.task_id, attempt, delay_secs = delay.as_secs(), "Scheduled retry");
                    return RunOutcome::RetryScheduled { attempt, delay };
                }
                Err(e) => logger.log_error(&format!("Failed to schedule retry: {}", e)),
            }
        }

        match self
            .store
            .set_status(job.task_id, TaskStatus::Failed, Some(message.clone()))
            .await
        {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { from, .. }) => {
                info!(task_id = %job.task_id, status = %from, "Task settled while running, failure not recorded");
            }
            Err(e) => logger.log_warning(&format!("Failure write did not land: {}", e)),
        }
        self.signals.on_failure(job.task_id, &message).await;

        RunOutcome::Failed { message, kind }
    }

    fn finish(&self, outcome: RunOutcome) -> RunOutcome {
        metrics::counter!("mforge_tasks_total", "outcome" => outcome.as_str()).increment(1);
        outcome
    }
}
