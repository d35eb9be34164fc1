//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use mforge_models::OperationKind;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Invalid {operation} config: {reason}")]
    InvalidConfig {
        operation: OperationKind,
        reason: String,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn invalid_config(operation: OperationKind, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            operation,
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Bad input rather than a failed transform.
    pub fn is_validation(&self) -> bool {
        matches!(self, MediaError::InvalidConfig { .. } | MediaError::FileNotFound(_))
    }

    /// Whether running the same transform again could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            MediaError::Timeout(_) => true,
            MediaError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(MediaError::Timeout(30).is_transient());
        assert!(!MediaError::ffmpeg_failed("bad filter", None, Some(1)).is_transient());
        assert!(MediaError::invalid_config(OperationKind::TextOverlay, "text is empty").is_validation());
        assert!(MediaError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk")).is_transient());
        assert!(!MediaError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")).is_transient());
    }

    #[test]
    fn test_invalid_config_message() {
        let err = MediaError::invalid_config(OperationKind::Join, "input_paths needs at least 2 entries");
        assert_eq!(err.to_string(), "Invalid join config: input_paths needs at least 2 entries");
    }
}
