//! Stage execution template.
//!
//! Every stage runs the same steps; only the buckets and the transform
//! differ:
//!
//! 1. Look up the video (by id, or by filename when the id is empty)
//! 2. Record the run as PROCESSING
//! 3. Download the input object
//! 4. Transform it
//! 5. Upload the result under the same object name
//! 6. Record the run as COMPLETED
//! 7. Notify the orchestrator
//!
//! A failure in steps 3 to 5 marks the video FAILED. A notification failure
//! is logged and does not fail the run.

use std::sync::Arc;

use vpipe_db::VideoRepository;
use vpipe_media::VideoProcessingService;
use vpipe_models::{Stage, StageMessage, StageRunStatus, Video, VideoId, VideoStatus};
use vpipe_storage::StorageRepository;

use crate::error::{StageError, StageResult};
use crate::logging::StageLogger;
use crate::metrics;
use crate::notifier::NotificationService;

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub video_id: VideoId,
    pub filename: String,
    /// `<output bucket>/<filename>`
    pub bucket_path: String,
    /// Whether the orchestrator was told about this run
    pub notified: bool,
}

pub struct StageWorker {
    stage: Stage,
    input_bucket: String,
    output_bucket: String,
    videos: Arc<dyn VideoRepository>,
    storage: Arc<dyn StorageRepository>,
    processor: Arc<dyn VideoProcessingService>,
    notifier: Arc<dyn NotificationService>,
}

impl StageWorker {
    pub fn new(
        stage: Stage,
        videos: Arc<dyn VideoRepository>,
        storage: Arc<dyn StorageRepository>,
        processor: Arc<dyn VideoProcessingService>,
        notifier: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
            stage,
            input_bucket: stage.default_input_bucket().to_string(),
            output_bucket: stage.default_output_bucket().to_string(),
            videos,
            storage,
            processor,
            notifier,
        }
    }

    /// Override the bucket pair.
    pub fn with_buckets(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.input_bucket = input.into();
        self.output_bucket = output.into();
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Run the stage for one message.
    pub async fn execute(&self, message: &StageMessage) -> StageResult<StageOutcome> {
        let result = self.run(message).await;
        let outcome = match &result {
            Ok(_) => "completed",
            Err(e) => e.step(),
        };
        metrics::record_stage_run(self.stage.as_str(), outcome);
        result
    }

    async fn run(&self, message: &StageMessage) -> StageResult<StageOutcome> {
        let video = self.find(message).await.map_err(StageError::Find)?;
        let filename = if message.filename.is_empty() {
            video.filename.clone()
        } else {
            message.filename.clone()
        };

        let logger = StageLogger::new(&video.id, self.stage);
        logger.log_start(&format!("{} from {}", filename, self.input_bucket));

        self.videos
            .record_stage_run(&video.id, self.stage, StageRunStatus::Processing)
            .await
            .map_err(StageError::MarkProcessing)?;

        let input = match self.storage.download(&self.input_bucket, &filename).await {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.fail(&video, &logger, StageError::Download(e)).await),
        };
        logger.log_progress(&format!("downloaded {} bytes", input.len()));

        let output = match self.processor.transform(input).await {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.fail(&video, &logger, StageError::Processing(e)).await),
        };
        logger.log_progress(&format!("{} produced {} bytes", self.processor.name(), output.len()));

        if let Err(e) = self.storage.upload(&self.output_bucket, &filename, output).await {
            return Err(self.fail(&video, &logger, StageError::Upload(e)).await);
        }

        self.videos
            .record_stage_run(&video.id, self.stage, StageRunStatus::Completed)
            .await
            .map_err(StageError::MarkCompleted)?;

        let bucket_path = format!("{}/{}", self.output_bucket, filename);
        let notified = match self
            .notifier
            .notify_video_processed(self.stage, &video.id, &filename, &bucket_path)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                logger.log_error(&format!(
                    "artifact {} stored but orchestrator was not notified: {}",
                    bucket_path, e
                ));
                metrics::record_notify_failure(self.stage.as_str());
                false
            }
        };

        logger.log_completion(&bucket_path);
        Ok(StageOutcome {
            video_id: video.id,
            filename,
            bucket_path,
            notified,
        })
    }

    async fn find(&self, message: &StageMessage) -> vpipe_db::RepositoryResult<Video> {
        if message.video_id.is_empty() {
            self.videos.find_by_filename(&message.filename).await
        } else {
            self.videos.find_by_id(&message.video_id).await
        }
    }

    /// Mark the video FAILED and hand back `err`.
    ///
    /// Errors while marking are logged; the original failure is what the
    /// caller reports.
    async fn fail(&self, video: &Video, logger: &StageLogger, err: StageError) -> StageError {
        logger.log_error(&err.to_string());

        if let Err(e) = self.videos.update_status(&video.id, VideoStatus::Failed).await {
            logger.log_warning(&format!("failed to mark video FAILED: {}", e));
        }
        if let Err(e) = self
            .videos
            .record_stage_run(&video.id, self.stage, StageRunStatus::Failed)
            .await
        {
            logger.log_warning(&format!("failed to record FAILED run: {}", e));
        }
        err
    }
}
