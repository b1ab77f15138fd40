//! Pipeline state machine.
//!
//! Every edge of the pipeline goes through [`Orchestrator::on_stage_completed`],
//! driven by the [`Stage`] table. Each edge publishes the next stage's message
//! first and only then writes the new status, so a failed publish leaves the
//! status untouched and the inbound message can be redelivered safely.

use std::sync::Arc;

use tracing::{info, warn};
use vpipe_db::VideoRepository;
use vpipe_models::{Stage, StageMessage, Video, VideoId, VideoStatus};
use vpipe_queue::{publish_json, PublishOutcome, Publisher, QueueNames};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics;

/// Moves videos forward through the stage table.
pub struct Orchestrator {
    videos: Arc<dyn VideoRepository>,
    publisher: Arc<dyn Publisher>,
    queues: QueueNames,
    /// Budget stamped on outgoing stage messages; `0` defers to each worker.
    stage_max_retries: u32,
}

impl Orchestrator {
    pub fn new(
        videos: Arc<dyn VideoRepository>,
        publisher: Arc<dyn Publisher>,
        queues: QueueNames,
    ) -> Self {
        Self {
            videos,
            publisher,
            queues,
            stage_max_retries: 0,
        }
    }

    pub fn with_stage_max_retries(mut self, max_retries: u32) -> Self {
        self.stage_max_retries = max_retries;
        self
    }

    pub fn queues(&self) -> &QueueNames {
        &self.queues
    }

    /// Start the pipeline for a video.
    ///
    /// Accepted from UPLOADED, TRIMMING (duplicate start) and FAILED
    /// (restart). Returns the new status.
    pub async fn start(&self, video_id: &VideoId) -> OrchestratorResult<VideoStatus> {
        let video = self.find(video_id).await?;

        if !matches!(
            video.status,
            VideoStatus::Uploaded | VideoStatus::Trimming | VideoStatus::Failed
        ) {
            metrics::record_transition("start", "skipped");
            return Err(OrchestratorError::AlreadyAdvanced {
                video_id: video.id,
                status: video.status,
            });
        }

        let first = Stage::first();
        let status = self.advance_to(&video, first, &video.filename).await?;
        metrics::record_transition("start", "advanced");
        info!(video_id = %video_id, stage = %first, "Pipeline started");
        Ok(status)
    }

    /// Handle the completion of `stage` for a video.
    ///
    /// Publishes the next stage's message and moves the status to that
    /// stage's in-progress value, or for the final stage marks the video
    /// PROCESSED with `filename` as its processed file. Returns the new status.
    pub async fn on_stage_completed(
        &self,
        stage: Stage,
        video_id: &VideoId,
        filename: &str,
    ) -> OrchestratorResult<VideoStatus> {
        let video = self.find(video_id).await?;

        if video.status.is_past(stage.in_progress_status()) || self.is_stale(&video, stage).await? {
            metrics::record_transition(stage.as_str(), "skipped");
            return Err(OrchestratorError::AlreadyAdvanced {
                video_id: video.id,
                status: video.status,
            });
        }

        let filename = if filename.is_empty() {
            video.filename.as_str()
        } else {
            filename
        };

        let status = match stage.next() {
            Some(next) => self.advance_to(&video, next, filename).await?,
            None => self.finish(&video, filename).await?,
        };

        metrics::record_transition(stage.as_str(), "advanced");
        info!(video_id = %video_id, stage = %stage, status = %status, "Stage completed");
        Ok(status)
    }

    pub async fn on_trim_completed(
        &self,
        video_id: &VideoId,
        filename: &str,
    ) -> OrchestratorResult<VideoStatus> {
        self.on_stage_completed(Stage::Trim, video_id, filename).await
    }

    pub async fn on_adjust_resolution_completed(
        &self,
        video_id: &VideoId,
        filename: &str,
    ) -> OrchestratorResult<VideoStatus> {
        self.on_stage_completed(Stage::AdjustResolution, video_id, filename).await
    }

    pub async fn on_remove_audio_completed(
        &self,
        video_id: &VideoId,
        filename: &str,
    ) -> OrchestratorResult<VideoStatus> {
        self.on_stage_completed(Stage::RemoveAudio, video_id, filename).await
    }

    pub async fn on_watermark_completed(
        &self,
        video_id: &VideoId,
        filename: &str,
    ) -> OrchestratorResult<VideoStatus> {
        self.on_stage_completed(Stage::Watermark, video_id, filename).await
    }

    pub async fn on_intro_outro_completed(
        &self,
        video_id: &VideoId,
        filename: &str,
    ) -> OrchestratorResult<VideoStatus> {
        self.on_stage_completed(Stage::IntroOutro, video_id, filename).await
    }

    /// A FAILED video has no rank, so its stage-run history decides: a
    /// completion for a stage behind the most recently completed one is a
    /// stale redelivery.
    async fn is_stale(&self, video: &Video, stage: Stage) -> OrchestratorResult<bool> {
        if video.status != VideoStatus::Failed {
            return Ok(false);
        }
        let last = self
            .videos
            .last_completed_stage(&video.id)
            .await
            .map_err(OrchestratorError::find_video)?;
        Ok(last.is_some_and(|last| stage < last))
    }

    async fn find(&self, video_id: &VideoId) -> OrchestratorResult<Video> {
        self.videos
            .find_by_id(video_id)
            .await
            .map_err(OrchestratorError::find_video)
    }

    /// Publish the message for `stage`, then record its in-progress status.
    async fn advance_to(
        &self,
        video: &Video,
        stage: Stage,
        filename: &str,
    ) -> OrchestratorResult<VideoStatus> {
        let queue = self.queues.for_stage(stage);
        let message = StageMessage::new(video.id.clone(), filename, self.stage_max_retries);

        let outcome = publish_json(self.publisher.as_ref(), queue, &message)
            .await
            .map_err(|e| OrchestratorError::publish(queue, e))?;
        if outcome == PublishOutcome::Dropped {
            warn!(
                video_id = %video.id,
                queue = %queue,
                "Stage message dropped by broker failure policy, advancing status anyway"
            );
        }

        let status = stage.in_progress_status();
        self.videos
            .update_status(&video.id, status)
            .await
            .map_err(OrchestratorError::update_status)?;
        Ok(status)
    }

    /// Terminal edge: status and processed file in one write.
    async fn finish(
        &self,
        video: &Video,
        processed_file: &str,
    ) -> OrchestratorResult<VideoStatus> {
        self.videos
            .update_status_and_processed_file(&video.id, VideoStatus::Processed, processed_file)
            .await
            .map_err(OrchestratorError::update_status)?;
        Ok(VideoStatus::Processed)
    }
}
