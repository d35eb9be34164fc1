//! Structured task logging.

use tracing::{error, info, warn, Span};

use mforge_models::{TaskId, TaskType};

/// Logs task lifecycle events with consistent context fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    task_id: TaskId,
    operation: String,
    attempt: u32,
}

impl JobLogger {
    pub fn new(task_id: TaskId, task_type: TaskType, attempt: u32) -> Self {
        Self {
            task_id,
            operation: task_type.as_str().to_string(),
            attempt,
        }
    }

    /// Logger for a task whose record has not been loaded yet.
    pub fn unresolved(task_id: TaskId, attempt: u32) -> Self {
        Self {
            task_id,
            operation: "unknown".to_string(),
            attempt,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            attempt = self.attempt,
            "Task started: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            task_id = %self.task_id,
            operation = %self.operation,
            attempt = self.attempt,
            "Task warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            task_id = %self.task_id,
            operation = %self.operation,
            attempt = self.attempt,
            "Task error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task completed: {}", message
        );
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span covering one attempt.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "task",
            task_id = %self.task_id,
            operation = %self.operation,
            attempt = self.attempt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let logger = JobLogger::new(TaskId(12), TaskType::Combined, 2);
        assert_eq!(logger.task_id(), TaskId(12));
        assert_eq!(logger.operation(), "combined");

        let logger = JobLogger::unresolved(TaskId(3), 1);
        assert_eq!(logger.operation(), "unknown");
    }
}
