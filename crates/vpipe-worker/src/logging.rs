//! Structured stage-run logging.
//!
//! Stamps the video id and stage onto every lifecycle event so a single run
//! can be followed across log lines.

use tracing::{error, info, warn, Span};
use vpipe_models::{Stage, VideoId};

/// Logger for one stage run of one video.
#[derive(Debug, Clone)]
pub struct StageLogger {
    video_id: String,
    stage: Stage,
}

impl StageLogger {
    pub fn new(video_id: &VideoId, stage: Stage) -> Self {
        Self {
            video_id: video_id.to_string(),
            stage,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            stage = %self.stage,
            "Stage started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            stage = %self.stage,
            "Stage progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            video_id = %self.video_id,
            stage = %self.stage,
            "Stage warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            video_id = %self.video_id,
            stage = %self.stage,
            "Stage error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            stage = %self.stage,
            "Stage completed: {}", message
        );
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Span covering the whole run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "stage_run",
            video_id = %self.video_id,
            stage = %self.stage
        )
    }
}
