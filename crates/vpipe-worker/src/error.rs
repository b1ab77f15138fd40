//! Stage worker error types.
//!
//! Each variant names the template step that failed. Storage and transform
//! failures are transient at the message level: the video is marked FAILED
//! but a later attempt may still succeed.

use thiserror::Error;
use vpipe_db::RepositoryError;
use vpipe_media::MediaError;
use vpipe_models::{Classify, ErrorKind};
use vpipe_storage::StorageError;

pub type StageResult<T> = Result<T, StageError>;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("find video: {0}")]
    Find(#[source] RepositoryError),

    #[error("mark processing: {0}")]
    MarkProcessing(#[source] RepositoryError),

    #[error("download: {0}")]
    Download(#[source] StorageError),

    #[error("processing: {0}")]
    Processing(#[source] MediaError),

    #[error("upload: {0}")]
    Upload(#[source] StorageError),

    #[error("mark completed: {0}")]
    MarkCompleted(#[source] RepositoryError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Short step label for logs and metrics.
    pub fn step(&self) -> &'static str {
        match self {
            StageError::Find(_) => "find",
            StageError::MarkProcessing(_) => "mark_processing",
            StageError::Download(_) => "download",
            StageError::Processing(_) => "processing",
            StageError::Upload(_) => "upload",
            StageError::MarkCompleted(_) => "mark_completed",
            StageError::ConfigError(_) => "config",
        }
    }
}

impl Classify for StageError {
    fn kind(&self) -> ErrorKind {
        match self {
            StageError::Find(e) | StageError::MarkProcessing(e) => e.kind(),
            StageError::Download(_)
            | StageError::Processing(_)
            | StageError::Upload(_)
            | StageError::MarkCompleted(_) => ErrorKind::Transient,
            StageError::ConfigError(_) => ErrorKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_object_is_still_retryable() {
        let err = StageError::Download(StorageError::not_found("trim/video123.mp4"));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.to_string(), "download: Object not found: trim/video123.mp4");
    }

    #[test]
    fn test_lookup_kind_follows_repository() {
        assert_eq!(
            StageError::Find(RepositoryError::not_found("123")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            StageError::Find(RepositoryError::invalid_id("abc")).kind(),
            ErrorKind::Permanent
        );
        assert_eq!(
            StageError::MarkProcessing(RepositoryError::unavailable("pool timed out")).kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_processing_failure_is_transient() {
        let err = StageError::Processing(MediaError::EmptyInput);
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.to_string().starts_with("processing: "));
        assert_eq!(err.step(), "processing");
    }
}
