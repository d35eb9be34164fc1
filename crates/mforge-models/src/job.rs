//! Task definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::file::FileId;
use crate::job_status::TaskStatus;
use crate::operation::OperationKind;

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(TaskId)
    }
}

/// Type of task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Join,
    AudioOverlay,
    TextOverlay,
    Subtitles,
    VideoOverlay,
    /// Ordered pipeline of 2–10 operations over one base file
    Combined,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Combined => "combined",
            other => other.operation().map(|k| k.as_str()).unwrap_or("unknown"),
        }
    }

    /// The single operation a simple task runs, or `None` for combined tasks.
    pub fn operation(&self) -> Option<OperationKind> {
        match self {
            TaskType::Join => Some(OperationKind::Join),
            TaskType::AudioOverlay => Some(OperationKind::AudioOverlay),
            TaskType::TextOverlay => Some(OperationKind::TextOverlay),
            TaskType::Subtitles => Some(OperationKind::Subtitles),
            TaskType::VideoOverlay => Some(OperationKind::VideoOverlay),
            TaskType::Combined => None,
        }
    }
}

impl From<OperationKind> for TaskType {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Join => TaskType::Join,
            OperationKind::AudioOverlay => TaskType::AudioOverlay,
            OperationKind::TextOverlay => TaskType::TextOverlay,
            OperationKind::Subtitles => TaskType::Subtitles,
            OperationKind::VideoOverlay => TaskType::VideoOverlay,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for creating a task; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub owner_id: String,
    pub task_type: TaskType,
    pub input_files: Vec<FileId>,
    pub config: Value,
    pub priority: i32,
}

impl NewTask {
    pub fn new(owner_id: impl Into<String>, task_type: TaskType, config: Value) -> Self {
        Self {
            owner_id: owner_id.into(),
            task_type,
            input_files: Vec::new(),
            config,
            priority: 0,
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<FileId>) -> Self {
        self.input_files = inputs;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Build the initial task record.
    pub fn into_task(self, id: TaskId) -> Task {
        let now = Utc::now();
        Task {
            id,
            owner_id: self.owner_id,
            task_type: self.task_type,
            status: TaskStatus::Pending,
            input_files: self.input_files,
            output_files: Vec::new(),
            config: self.config,
            error_message: None,
            progress: 0.0,
            result: None,
            retry_count: 0,
            priority: self.priority,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// A unit of submitted media work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub status: TaskStatus,
    /// Ordered input file references
    #[serde(default)]
    pub input_files: Vec<FileId>,
    /// Produced files; append-only
    #[serde(default)]
    pub output_files: Vec<FileId>,
    /// Operation-specific parameters
    #[serde(default)]
    pub config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Progress (0.0–100.0)
    #[serde(default)]
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Explicit user retries; internal backoff never touches this
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// First input file, the base resource of simple and combined tasks.
    pub fn base_input(&self) -> Option<FileId> {
        self.input_files.first().copied()
    }
}

/// Clamp a progress value into `[0, 100]`, mapping NaN to 0.
pub fn clamp_progress(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_task_defaults() {
        let task = NewTask::new("user-1", TaskType::Join, json!({}))
            .with_inputs(vec![FileId(1), FileId(2)])
            .into_task(TaskId(10));

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0.0);
        assert!(task.output_files.is_empty());
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.base_input(), Some(FileId(1)));
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_task_type_operation_mapping() {
        assert_eq!(TaskType::Combined.operation(), None);
        for kind in OperationKind::ALL {
            assert_eq!(TaskType::from(kind).operation(), Some(kind));
            assert_eq!(TaskType::from(kind).as_str(), kind.as_str());
        }
        assert_eq!(TaskType::Combined.to_string(), "combined");
    }

    #[test]
    fn test_clamp_progress() {
        assert_eq!(clamp_progress(-5.0), 0.0);
        assert_eq!(clamp_progress(150.0), 100.0);
        assert_eq!(clamp_progress(42.5), 42.5);
        assert_eq!(clamp_progress(f64::NAN), 0.0);
    }

    #[test]
    fn test_task_serde() {
        let task = NewTask::new("u", TaskType::Combined, json!({"operations": []})).into_task(TaskId(3));
        let encoded = serde_json::to_value(&task).unwrap();
        assert_eq!(encoded["task_type"], "combined");
        assert_eq!(encoded["status"], "pending");
        let decoded: Task = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, task);
    }
}
