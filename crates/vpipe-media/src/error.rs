//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;
use vpipe_models::{Classify, ErrorKind};

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

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Asset not found: {0}")]
    AssetNotFound(PathBuf),

    #[error("Empty input")]
    EmptyInput,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
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
}

/// A failed transform marks the video FAILED; the message itself stays
/// retryable since a later attempt (after an operator fix) may succeed.
impl Classify for MediaError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Transient
    }
}
