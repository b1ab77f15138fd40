//! Video repository seam.

use async_trait::async_trait;
use vpipe_models::{Stage, StageRunStatus, Video, VideoId, VideoStatus};

use crate::error::RepositoryResult;

/// Access to video records.
///
/// The orchestrator moves `status` forward through `update_status` and sets
/// the final file through `update_status_and_processed_file`. Stage workers
/// only record their own run state, plus `FAILED` on the video.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn find_by_id(&self, id: &VideoId) -> RepositoryResult<Video>;

    async fn find_by_filename(&self, filename: &str) -> RepositoryResult<Video>;

    async fn update_status(&self, id: &VideoId, status: VideoStatus) -> RepositoryResult<()>;

    /// Set status and processed file in one write.
    async fn update_status_and_processed_file(
        &self,
        id: &VideoId,
        status: VideoStatus,
        processed_file: &str,
    ) -> RepositoryResult<()>;

    /// Record the worker-local state of one stage run.
    async fn record_stage_run(
        &self,
        id: &VideoId,
        stage: Stage,
        status: StageRunStatus,
    ) -> RepositoryResult<()>;

    /// The stage whose run most recently reached COMPLETED, if any.
    async fn last_completed_stage(&self, id: &VideoId) -> RepositoryResult<Option<Stage>>;
}
