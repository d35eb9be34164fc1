//! Shared data models for the MediaForge job engine.
//!
//! This crate provides Serde-serializable types for:
//! - Tasks and their lifecycle status
//! - File records (stored and lazily registered remote files)
//! - Operation descriptors and combined-job configuration
//! - Result payloads

pub mod error;
pub mod file;
pub mod job;
pub mod job_status;
pub mod operation;
pub mod result;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use file::{content_type_for_extension, extension_for_content_type, FileId, FileRecord, NewFile};
pub use job::{clamp_progress, NewTask, Task, TaskId, TaskType};
pub use job_status::TaskStatus;
pub use operation::{CombinedConfig, OperationDescriptor, OperationKind, MAX_OPERATIONS, MIN_OPERATIONS};
