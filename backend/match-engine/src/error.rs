use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Cache tier unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Batch {batch_id} exceeded its {timeout:?} budget")]
    BatchTimeout { batch_id: usize, timeout: Duration },

    #[error("Batch {batch_id} failed permanently after {attempts} attempts: {last_error}")]
    BatchFailurePermanent {
        batch_id: usize,
        attempts: u32,
        last_error: String,
    },

    #[error("Run deadline exceeded")]
    RunDeadlineExceeded,

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Invalid user {user_id}: {reason}")]
    InvalidUser { user_id: u64, reason: String },

    #[error("Result sink error: {0}")]
    Sink(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Worker panicked while running batch {batch_id}")]
    WorkerPanicked { batch_id: usize },
}

/// Tag carried through the batch state machine and into the run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CacheUnavailable,
    BatchTimeout,
    BatchFailurePermanent,
    RunDeadlineExceeded,
    Cancelled,
    ConfigInvalid,
    InvalidUser,
    Sink,
    Catalog,
    WorkerPanicked,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::CacheUnavailable(_) => ErrorKind::CacheUnavailable,
            EngineError::BatchTimeout { .. } => ErrorKind::BatchTimeout,
            EngineError::BatchFailurePermanent { .. } => ErrorKind::BatchFailurePermanent,
            EngineError::RunDeadlineExceeded => ErrorKind::RunDeadlineExceeded,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            EngineError::InvalidUser { .. } => ErrorKind::InvalidUser,
            EngineError::Sink(_) => ErrorKind::Sink,
            EngineError::Catalog(_) => ErrorKind::Catalog,
            EngineError::WorkerPanicked { .. } => ErrorKind::WorkerPanicked,
        }
    }

    /// Whether a batch attempt that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::BatchTimeout { .. }
                | EngineError::Sink(_)
                | EngineError::CacheUnavailable(_)
        )
    }
}

impl From<envy::Error> for EngineError {
    fn from(err: envy::Error) -> Self {
        EngineError::ConfigInvalid(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Catalog(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Catalog(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(
            EngineError::ConfigInvalid("x".into()).kind(),
            ErrorKind::ConfigInvalid
        );
        let timeout = EngineError::BatchTimeout {
            batch_id: 3,
            timeout: Duration::from_secs(60),
        };
        assert_eq!(timeout.kind(), ErrorKind::BatchTimeout);
        assert!(timeout.is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
        assert!(!EngineError::ConfigInvalid("x".into()).is_retryable());
    }
}
