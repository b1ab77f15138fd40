//! Orchestrator error types.

use std::fmt;

use thiserror::Error;
use vpipe_db::RepositoryError;
use vpipe_models::{Classify, ErrorKind, VideoId, VideoStatus};
use vpipe_queue::QueueError;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Where in a transition a failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    FindVideo,
    PublishTo(String),
    UpdateStatus,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::FindVideo => write!(f, "find video"),
            Step::PublishTo(queue) => write!(f, "publish to {}", queue),
            Step::UpdateStatus => write!(f, "update status"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{step}: {source}")]
    Repository {
        step: Step,
        #[source]
        source: RepositoryError,
    },

    #[error("{step}: {source}")]
    Publish {
        step: Step,
        #[source]
        source: QueueError,
    },

    /// Duplicate or stale delivery; the video is already further along.
    #[error("video {video_id} already advanced to {status}")]
    AlreadyAdvanced {
        video_id: VideoId,
        status: VideoStatus,
    },
}

impl OrchestratorError {
    pub fn find_video(source: RepositoryError) -> Self {
        Self::Repository {
            step: Step::FindVideo,
            source,
        }
    }

    pub fn update_status(source: RepositoryError) -> Self {
        Self::Repository {
            step: Step::UpdateStatus,
            source,
        }
    }

    pub fn publish(queue: impl Into<String>, source: QueueError) -> Self {
        Self::Publish {
            step: Step::PublishTo(queue.into()),
            source,
        }
    }

    pub fn step(&self) -> Option<&Step> {
        match self {
            OrchestratorError::Repository { step, .. }
            | OrchestratorError::Publish { step, .. } => Some(step),
            OrchestratorError::AlreadyAdvanced { .. } => None,
        }
    }

    pub fn is_already_advanced(&self) -> bool {
        matches!(self, OrchestratorError::AlreadyAdvanced { .. })
    }
}

impl Classify for OrchestratorError {
    fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Repository { source, .. } => source.kind(),
            OrchestratorError::Publish { source, .. } => source.kind(),
            OrchestratorError::AlreadyAdvanced { .. } => ErrorKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_prefix() {
        let err = OrchestratorError::publish(
            "trim_video_queue",
            QueueError::connection_failed("connection refused"),
        );
        assert_eq!(
            err.to_string(),
            "publish to trim_video_queue: Connection failed: connection refused"
        );
        assert_eq!(err.kind(), ErrorKind::Transient);

        let err = OrchestratorError::find_video(RepositoryError::not_found("123"));
        assert!(err.to_string().starts_with("find video: "));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_kind_follows_source() {
        let err = OrchestratorError::update_status(RepositoryError::constraint_violation("check"));
        assert_eq!(err.step(), Some(&Step::UpdateStatus));
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }
}
