//! Worker error types and retry classification.

use thiserror::Error;

use mforge_media::MediaError;
use mforge_models::ModelError;
use mforge_queue::QueueError;
use mforge_storage::StorageError;
use mforge_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, missing entities, unexpected faults. Never retried.
    Permanent,
    /// Network or storage I/O. Eligible for a delayed retry.
    Temporary,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Permanent => "permanent",
            ErrorKind::Temporary => "temporary",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Malformed or missing input.
    #[error("{0}")]
    Validation(String),

    /// Network or storage failure.
    #[error("{0}")]
    TransientIo(String),

    /// A media transform failed.
    #[error("{message}")]
    Processing { message: String, transient: bool },

    /// Anything unexpected.
    #[error("{0}")]
    Internal(String),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient_io(msg: impl Into<String>) -> Self {
        Self::TransientIo(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing {
            message: msg.into(),
            transient: false,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::TransientIo(_) => ErrorKind::Temporary,
            WorkerError::Processing { transient: true, .. } => ErrorKind::Temporary,
            WorkerError::Validation(_) | WorkerError::Processing { .. } | WorkerError::Internal(_) => {
                ErrorKind::Permanent
            }
        }
    }
}

impl From<ModelError> for WorkerError {
    fn from(e: ModelError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<StorageError> for WorkerError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) | StorageError::InvalidKey(_) => Self::Validation(e.to_string()),
            StorageError::ConfigError(_) => Self::Internal(e.to_string()),
            _ => Self::TransientIo(e.to_string()),
        }
    }
}

impl From<StoreError> for WorkerError {
    fn from(e: StoreError) -> Self {
        if e.is_not_found() {
            Self::Validation(e.to_string())
        } else if e.is_transient() {
            Self::TransientIo(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl From<MediaError> for WorkerError {
    fn from(e: MediaError) -> Self {
        if e.is_validation() {
            Self::Validation(e.to_string())
        } else {
            Self::Processing {
                transient: e.is_transient(),
                message: e.to_string(),
            }
        }
    }
}

impl From<QueueError> for WorkerError {
    fn from(e: QueueError) -> Self {
        if e.is_transient() {
            Self::TransientIo(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl From<std::io::Error> for WorkerError {
    fn from(e: std::io::Error) -> Self {
        Self::TransientIo(e.to_string())
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.is_client_error() => Self::Validation(format!("Remote fetch failed: {}", e)),
            _ => Self::TransientIo(format!("Remote fetch failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mforge_models::{OperationKind, TaskId};

    #[test]
    fn test_classification() {
        assert_eq!(WorkerError::from(ModelError::TooFewOperations(1)).kind(), ErrorKind::Permanent);
        assert_eq!(
            WorkerError::from(StorageError::download_failed("connection reset")).kind(),
            ErrorKind::Temporary
        );
        assert_eq!(WorkerError::from(StorageError::not_found("k")).kind(), ErrorKind::Permanent);
        assert_eq!(WorkerError::from(StoreError::TaskNotFound(TaskId(1))).kind(), ErrorKind::Permanent);
        assert_eq!(WorkerError::from(StoreError::unavailable("down")).kind(), ErrorKind::Temporary);
        assert_eq!(WorkerError::from(MediaError::Timeout(30)).kind(), ErrorKind::Temporary);
        assert_eq!(
            WorkerError::from(MediaError::ffmpeg_failed("bad filter", None, Some(1))).kind(),
            ErrorKind::Permanent
        );
        assert!(matches!(
            WorkerError::from(MediaError::invalid_config(OperationKind::Join, "x")),
            WorkerError::Validation(_)
        ));
        assert_eq!(WorkerError::internal("boom").kind(), ErrorKind::Permanent);
        assert_eq!(WorkerError::from(QueueError::connection_failed("refused")).kind(), ErrorKind::Temporary);
    }

    #[test]
    fn test_message_passes_through() {
        let err = WorkerError::from(ModelError::TooFewOperations(1));
        assert_eq!(err.to_string(), "Combined job requires at least 2 operations, got 1");
    }
}
