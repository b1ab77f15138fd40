//! Pipeline stages.
//!
//! The pipeline is a fixed, ordered table. Everything that differs between
//! stages (queue, buckets, in-progress status, legacy bucket marker) hangs off
//! the [`Stage`] enum so the orchestrator can stay table driven.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::video::VideoStatus;

/// One transformation step of the video pipeline.
///
/// Variants are declared in pipeline order, so `Ord` follows the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Trim,
    AdjustResolution,
    RemoveAudio,
    Watermark,
    IntroOutro,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Trim,
        Stage::AdjustResolution,
        Stage::RemoveAudio,
        Stage::Watermark,
        Stage::IntroOutro,
    ];

    pub fn first() -> Stage {
        Stage::Trim
    }

    /// The stage that runs after this one, `None` for the final stage.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Trim => Some(Stage::AdjustResolution),
            Stage::AdjustResolution => Some(Stage::RemoveAudio),
            Stage::RemoveAudio => Some(Stage::Watermark),
            Stage::Watermark => Some(Stage::IntroOutro),
            Stage::IntroOutro => None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.next().is_none()
    }

    /// Video status while this stage owns the video.
    pub fn in_progress_status(&self) -> VideoStatus {
        match self {
            Stage::Trim => VideoStatus::Trimming,
            Stage::AdjustResolution => VideoStatus::AdjustingResolution,
            Stage::RemoveAudio => VideoStatus::RemovingAudio,
            Stage::Watermark => VideoStatus::AddingWatermark,
            Stage::IntroOutro => VideoStatus::AddingIntroOutro,
        }
    }

    /// Marker that older producers embed in the bucket path.
    pub fn bucket_marker(&self) -> &'static str {
        match self {
            Stage::Trim => "trim",
            Stage::AdjustResolution => "edit",
            Stage::RemoveAudio => "audio-removal",
            Stage::Watermark => "watermarking",
            Stage::IntroOutro => "gossip",
        }
    }

    pub fn default_queue(&self) -> &'static str {
        match self {
            Stage::Trim => "trim_video_queue",
            Stage::AdjustResolution => "edit_video_queue",
            Stage::RemoveAudio => "audio_removal_queue",
            Stage::Watermark => "watermarking_queue",
            Stage::IntroOutro => "gossip_video_queue",
        }
    }

    /// Bucket this stage reads from: the previous stage's output, or the
    /// upload bucket for the first stage.
    pub fn default_input_bucket(&self) -> &'static str {
        match self {
            Stage::Trim => "uploads",
            Stage::AdjustResolution => Stage::Trim.default_output_bucket(),
            Stage::RemoveAudio => Stage::AdjustResolution.default_output_bucket(),
            Stage::Watermark => Stage::RemoveAudio.default_output_bucket(),
            Stage::IntroOutro => Stage::Watermark.default_output_bucket(),
        }
    }

    pub fn default_output_bucket(&self) -> &'static str {
        self.bucket_marker()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Trim => "trim",
            Stage::AdjustResolution => "adjust_resolution",
            Stage::RemoveAudio => "remove_audio",
            Stage::Watermark => "watermark",
            Stage::IntroOutro => "intro_outro",
        }
    }

    /// Legacy routing from a bucket path.
    ///
    /// The first marker contained anywhere in `path`, checked in pipeline
    /// order, wins: `"videos-trim/x.mp4"` is the trim stage. Returns `None`
    /// when no marker is present; callers treat that as the final stage.
    pub fn from_bucket_path(path: &str) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| !stage.is_final())
            .find(|stage| path.contains(stage.bucket_marker()))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown stage name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage: {0}")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "trim" => Ok(Stage::Trim),
            "adjust_resolution" | "edit" => Ok(Stage::AdjustResolution),
            "remove_audio" | "audio_removal" => Ok(Stage::RemoveAudio),
            "watermark" | "watermarking" => Ok(Stage::Watermark),
            "intro_outro" | "gossip" => Ok(Stage::IntroOutro),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}
