//! Validation errors raised while interpreting task configuration.

use thiserror::Error;

/// Result type for model validation.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors produced when a task's configuration cannot be interpreted.
///
/// Every variant describes bad input, so callers treat them as permanent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Combined job requires at least 2 operations, got {0}")]
    TooFewOperations(usize),

    #[error("Combined job allows at most 10 operations, got {0}")]
    TooManyOperations(usize),

    #[error("Combined job has no base file reference")]
    MissingBaseFile,

    #[error("Operation {index} has unknown type '{name}'")]
    UnknownOperation { index: usize, name: String },

    #[error("Operation {index} config must be a keyed mapping")]
    ConfigNotMapping { index: usize },

    #[error("Operation {index} is malformed: {reason}")]
    MalformedOperation { index: usize, reason: String },

    #[error("Invalid task config: {0}")]
    InvalidConfig(String),
}

impl ModelError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
