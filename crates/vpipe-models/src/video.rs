//! Video record models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Pipeline status of a video.
///
/// The pipeline values are ordered: `Uploaded < Trimming < AdjustingResolution
/// < RemovingAudio < AddingWatermark < AddingIntroOutro < Processed < Published`.
/// `Failed` sits outside that order and is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    #[default]
    Uploaded,
    Trimming,
    AdjustingResolution,
    RemovingAudio,
    AddingWatermark,
    AddingIntroOutro,
    Processed,
    /// Set by a user action outside the pipeline.
    Published,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploaded => "UPLOADED",
            VideoStatus::Trimming => "TRIMMING",
            VideoStatus::AdjustingResolution => "ADJUSTING_RESOLUTION",
            VideoStatus::RemovingAudio => "REMOVING_AUDIO",
            VideoStatus::AddingWatermark => "ADDING_WATERMARK",
            VideoStatus::AddingIntroOutro => "ADDING_INTRO_OUTRO",
            VideoStatus::Processed => "PROCESSED",
            VideoStatus::Published => "PUBLISHED",
            VideoStatus::Failed => "FAILED",
        }
    }

    /// Position in the pipeline order, `None` for `Failed`.
    pub fn rank(&self) -> Option<u8> {
        match self {
            VideoStatus::Uploaded => Some(0),
            VideoStatus::Trimming => Some(1),
            VideoStatus::AdjustingResolution => Some(2),
            VideoStatus::RemovingAudio => Some(3),
            VideoStatus::AddingWatermark => Some(4),
            VideoStatus::AddingIntroOutro => Some(5),
            VideoStatus::Processed => Some(6),
            VideoStatus::Published => Some(7),
            VideoStatus::Failed => None,
        }
    }

    /// True when `self` is strictly later in the pipeline than `other`.
    ///
    /// `Failed` is never past anything, and nothing is past `Failed`.
    pub fn is_past(&self, other: VideoStatus) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        }
    }

    /// Whether the video carries a processed file in this status.
    pub fn has_processed_file(&self) -> bool {
        matches!(self, VideoStatus::Processed | VideoStatus::Published)
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown video status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for VideoStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UPLOADED" => Ok(VideoStatus::Uploaded),
            "TRIMMING" => Ok(VideoStatus::Trimming),
            "ADJUSTING_RESOLUTION" => Ok(VideoStatus::AdjustingResolution),
            "REMOVING_AUDIO" => Ok(VideoStatus::RemovingAudio),
            "ADDING_WATERMARK" => Ok(VideoStatus::AddingWatermark),
            "ADDING_INTRO_OUTRO" => Ok(VideoStatus::AddingIntroOutro),
            "PROCESSED" => Ok(VideoStatus::Processed),
            "PUBLISHED" => Ok(VideoStatus::Published),
            "FAILED" => Ok(VideoStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Worker-local state of one stage run for one video.
///
/// This is not the video's pipeline status; each stage worker keeps its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageRunStatus {
    Processing,
    Completed,
    Failed,
}

impl StageRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageRunStatus::Processing => "PROCESSING",
            StageRunStatus::Completed => "COMPLETED",
            StageRunStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for StageRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Video record as persisted by the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Video {
    /// Unique video ID
    pub id: VideoId,

    /// Original object name in the upload bucket
    pub filename: String,

    /// Pipeline status
    #[serde(default)]
    pub status: VideoStatus,

    /// Final object name, present once processing finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_file: Option<String>,

    /// Upload timestamp
    pub uploaded_at: DateTime<Utc>,

    /// Processing completion timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Video {
    /// Create a freshly uploaded video record.
    pub fn new(id: VideoId, filename: impl Into<String>) -> Self {
        Self {
            id,
            filename: filename.into(),
            status: VideoStatus::Uploaded,
            processed_file: None,
            uploaded_at: Utc::now(),
            processed_at: None,
        }
    }

    /// `processed_file` is set if and only if the status carries one.
    pub fn is_consistent(&self) -> bool {
        self.processed_file.is_some() == self.status.has_processed_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_generation() {
        let id1 = VideoId::new();
        let id2 = VideoId::new();
        assert_ne!(id1, id2);
        assert!(!id1.is_empty());
        assert!(VideoId::from("  ").is_empty());
    }

    #[test]
    fn test_status_order() {
        let order = [
            VideoStatus::Uploaded,
            VideoStatus::Trimming,
            VideoStatus::AdjustingResolution,
            VideoStatus::RemovingAudio,
            VideoStatus::AddingWatermark,
            VideoStatus::AddingIntroOutro,
            VideoStatus::Processed,
            VideoStatus::Published,
        ];
        for pair in order.windows(2) {
            assert!(pair[1].is_past(pair[0]));
            assert!(!pair[0].is_past(pair[1]));
        }
        assert!(!VideoStatus::Failed.is_past(VideoStatus::Uploaded));
        assert!(!VideoStatus::Processed.is_past(VideoStatus::Failed));
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&VideoStatus::AdjustingResolution).unwrap();
        assert_eq!(json, "\"ADJUSTING_RESOLUTION\"");
        assert_eq!(
            "adding_intro_outro".parse::<VideoStatus>().unwrap(),
            VideoStatus::AddingIntroOutro
        );
        assert!("DONE".parse::<VideoStatus>().is_err());
    }

    #[test]
    fn test_new_video_is_consistent() {
        let mut video = Video::new(VideoId::from("123"), "clip.mp4");
        assert_eq!(video.status, VideoStatus::Uploaded);
        assert!(video.is_consistent());

        video.status = VideoStatus::Processed;
        assert!(!video.is_consistent());
        video.processed_file = Some("clip.mp4".into());
        assert!(video.is_consistent());
    }
}
