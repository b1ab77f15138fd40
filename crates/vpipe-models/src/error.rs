//! Error classification shared across the pipeline.
//!
//! Every error type in the workspace reports one of three kinds. Consumers
//! decide between retry and drop from the kind alone.

use std::fmt;

/// How a failure should be treated by a message consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The video record does not exist. Never retried.
    NotFound,
    /// Infrastructure noise (broker, storage, database, transform). Redelivered.
    Transient,
    /// The input can never succeed (malformed payload or id, constraint violation). Dropped.
    Permanent,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Implemented by every error type that can reach a message consumer.
pub trait Classify {
    fn kind(&self) -> ErrorKind;

    fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl Classify for serde_json::Error {
    fn kind(&self) -> ErrorKind {
        if self.is_io() {
            ErrorKind::Transient
        } else {
            ErrorKind::Permanent
        }
    }
}
