//! Shared data models for the video pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - The video record and its pipeline status
//! - Stage identifiers and the ordered stage table
//! - Broker message schemas (stage start / stage completed)
//! - Retry fields and the retry policy shared by every consumer
//! - Error kinds used to decide retry vs. drop

pub mod error;
pub mod message;
pub mod retry;
pub mod stage;
pub mod video;

// Re-export common types
pub use error::{Classify, ErrorKind};
pub use message::{InboundMessage, StageCompletedMessage, StageMessage};
pub use retry::{RetryInfo, RetryPolicy, RetryRejection};
pub use stage::Stage;
pub use video::{StageRunStatus, Video, VideoId, VideoStatus};
