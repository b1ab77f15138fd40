//! Queue error types.

use thiserror::Error;
use vpipe_models::{Classify, ErrorKind};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Queue {queue} is full ({max_length} messages)")]
    QueueFull { queue: String, max_length: u64 },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn publish_failed(msg: impl Into<String>) -> Self {
        Self::PublishFailed(msg.into())
    }

    /// Whether the underlying connection should be thrown away.
    pub fn is_connection_error(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_) => true,
            QueueError::Redis(e) => {
                e.is_connection_dropped() || e.is_io_error() || e.is_connection_refusal()
            }
            _ => false,
        }
    }
}

impl Classify for QueueError {
    fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Json(_) => ErrorKind::Permanent,
            _ => ErrorKind::Transient,
        }
    }
}
