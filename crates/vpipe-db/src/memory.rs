//! In-memory video repository.
//!
//! Enforces the same `processed_file` invariant as the database CHECK so that
//! tests against it catch the same mistakes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use vpipe_models::{Stage, StageRunStatus, Video, VideoId, VideoStatus};

use crate::error::{RepositoryError, RepositoryResult};
use crate::repository::VideoRepository;

#[derive(Debug, Default)]
pub struct MemoryVideoRepository {
    videos: Mutex<HashMap<String, Video>>,
    stage_runs: Mutex<Vec<(VideoId, Stage, StageRunStatus)>>,
    status_writes: Mutex<Vec<(VideoId, VideoStatus)>>,
    fail_lookups: AtomicBool,
    fail_status_updates: AtomicBool,
    failing_runs: Mutex<HashSet<StageRunStatus>>,
}

impl MemoryVideoRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository seeded with `videos`.
    pub fn with_videos(videos: impl IntoIterator<Item = Video>) -> Self {
        let repo = Self::new();
        for video in videos {
            repo.insert(video);
        }
        repo
    }

    pub fn insert(&self, video: Video) {
        if let Ok(mut videos) = self.videos.lock() {
            videos.insert(video.id.as_str().to_string(), video);
        }
    }

    /// Current record, bypassing failure injection.
    pub fn get(&self, id: &str) -> Option<Video> {
        self.videos.lock().ok().and_then(|v| v.get(id).cloned())
    }

    /// Every status write, in order.
    pub fn status_writes(&self) -> Vec<(VideoId, VideoStatus)> {
        self.status_writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Every stage-run record, in order.
    pub fn stage_runs(&self) -> Vec<(VideoId, Stage, StageRunStatus)> {
        self.stage_runs.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Make lookups fail as if the database were unreachable.
    pub fn fail_lookups(&self) {
        self.fail_lookups.store(true, Ordering::SeqCst);
    }

    /// Make status writes fail as if the database were unreachable.
    pub fn fail_status_updates(&self) {
        self.fail_status_updates.store(true, Ordering::SeqCst);
    }

    /// Make stage-run records with `status` fail.
    pub fn fail_stage_run(&self, status: StageRunStatus) {
        if let Ok(mut failing) = self.failing_runs.lock() {
            failing.insert(status);
        }
    }

    fn lookup(&self, predicate: impl Fn(&Video) -> bool, what: &str) -> RepositoryResult<Video> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(RepositoryError::unavailable("connection refused"));
        }
        let videos = self
            .videos
            .lock()
            .map_err(|_| RepositoryError::unavailable("repository lock poisoned"))?;
        videos
            .values()
            .find(|v| predicate(v))
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(what))
    }

    /// Apply a status write. `processed_file` replaces the stored file when
    /// given; otherwise the stored file is kept, as the SQL UPDATE does.
    fn write(
        &self,
        id: &VideoId,
        status: VideoStatus,
        processed_file: Option<&str>,
    ) -> RepositoryResult<()> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::unavailable("connection refused"));
        }

        let mut videos = self
            .videos
            .lock()
            .map_err(|_| RepositoryError::unavailable("repository lock poisoned"))?;
        let video = videos
            .get_mut(id.as_str())
            .ok_or_else(|| RepositoryError::not_found(id.as_str()))?;

        let file = processed_file
            .map(str::to_string)
            .or_else(|| video.processed_file.clone());
        if file.is_some() != status.has_processed_file() {
            return Err(RepositoryError::constraint_violation(format!(
                "videos_processed_file_iff_processed: status {} with processed_file {:?}",
                status, file
            )));
        }

        video.status = status;
        video.processed_file = file;
        if status == VideoStatus::Processed {
            video.processed_at = Some(Utc::now());
        }
        drop(videos);

        if let Ok(mut writes) = self.status_writes.lock() {
            writes.push((id.clone(), status));
        }
        Ok(())
    }
}

#[async_trait]
impl VideoRepository for MemoryVideoRepository {
    async fn find_by_id(&self, id: &VideoId) -> RepositoryResult<Video> {
        self.lookup(|v| &v.id == id, id.as_str())
    }

    async fn find_by_filename(&self, filename: &str) -> RepositoryResult<Video> {
        self.lookup(|v| v.filename == filename, filename)
    }

    async fn update_status(&self, id: &VideoId, status: VideoStatus) -> RepositoryResult<()> {
        self.write(id, status, None)
    }

    async fn update_status_and_processed_file(
        &self,
        id: &VideoId,
        status: VideoStatus,
        processed_file: &str,
    ) -> RepositoryResult<()> {
        self.write(id, status, Some(processed_file))
    }

    async fn record_stage_run(
        &self,
        id: &VideoId,
        stage: Stage,
        status: StageRunStatus,
    ) -> RepositoryResult<()> {
        let failing = self
            .failing_runs
            .lock()
            .map(|f| f.contains(&status))
            .unwrap_or(false);
        if failing {
            return Err(RepositoryError::unavailable("connection refused"));
        }

        if let Ok(mut runs) = self.stage_runs.lock() {
            runs.push((id.clone(), stage, status));
        }
        Ok(())
    }

    async fn last_completed_stage(&self, id: &VideoId) -> RepositoryResult<Option<Stage>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(RepositoryError::unavailable("connection refused"));
        }
        let runs = self
            .stage_runs
            .lock()
            .map_err(|_| RepositoryError::unavailable("repository lock poisoned"))?;
        Ok(runs
            .iter()
            .rev()
            .find(|(run_id, _, status)| run_id == id && *status == StageRunStatus::Completed)
            .map(|(_, stage, _)| *stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpipe_models::{Classify, ErrorKind};

    fn repo() -> MemoryVideoRepository {
        MemoryVideoRepository::with_videos([Video::new(VideoId::from("123"), "video123.mp4")])
    }

    #[tokio::test]
    async fn test_find_by_id_and_filename() {
        let repo = repo();
        let by_id = repo.find_by_id(&VideoId::from("123")).await.unwrap();
        let by_name = repo.find_by_filename("video123.mp4").await.unwrap();
        assert_eq!(by_id, by_name);

        let err = repo.find_by_id(&VideoId::from("999")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_processed_file_invariant() {
        let repo = repo();
        let id = VideoId::from("123");

        let err = repo.update_status(&id, VideoStatus::Processed).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);

        let err = repo
            .update_status_and_processed_file(&id, VideoStatus::Trimming, "x.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ConstraintViolation(_)));

        repo.update_status_and_processed_file(&id, VideoStatus::Processed, "final.mp4")
            .await
            .unwrap();
        let video = repo.get("123").unwrap();
        assert_eq!(video.processed_file.as_deref(), Some("final.mp4"));
        assert!(video.processed_at.is_some());
        assert!(video.is_consistent());
    }

    #[tokio::test]
    async fn test_status_write_keeps_processed_file() {
        let repo = repo();
        let id = VideoId::from("123");
        repo.update_status_and_processed_file(&id, VideoStatus::Processed, "final.mp4")
            .await
            .unwrap();

        repo.update_status(&id, VideoStatus::Published).await.unwrap();
        assert_eq!(repo.get("123").unwrap().processed_file.as_deref(), Some("final.mp4"));

        // The stored file makes any non-final status violate the CHECK.
        let err = repo.update_status(&id, VideoStatus::Failed).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ConstraintViolation(_)));
        assert_eq!(repo.get("123").unwrap().status, VideoStatus::Published);
    }

    #[tokio::test]
    async fn test_last_completed_stage() {
        let repo = repo();
        let id = VideoId::from("123");
        assert_eq!(repo.last_completed_stage(&id).await.unwrap(), None);

        for stage in [Stage::Trim, Stage::AdjustResolution] {
            repo.record_stage_run(&id, stage, StageRunStatus::Completed)
                .await
                .unwrap();
        }
        repo.record_stage_run(&id, Stage::RemoveAudio, StageRunStatus::Failed)
            .await
            .unwrap();
        assert_eq!(
            repo.last_completed_stage(&id).await.unwrap(),
            Some(Stage::AdjustResolution)
        );

        // A rerun after a restart is the most recent completion.
        repo.record_stage_run(&id, Stage::Trim, StageRunStatus::Completed)
            .await
            .unwrap();
        assert_eq!(repo.last_completed_stage(&id).await.unwrap(), Some(Stage::Trim));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let repo = repo();
        repo.fail_status_updates();
        let err = repo
            .update_status(&VideoId::from("123"), VideoStatus::Trimming)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(repo.status_writes().is_empty());

        repo.fail_stage_run(StageRunStatus::Completed);
        let id = VideoId::from("123");
        repo.record_stage_run(&id, Stage::Trim, StageRunStatus::Processing)
            .await
            .unwrap();
        assert!(repo
            .record_stage_run(&id, Stage::Trim, StageRunStatus::Completed)
            .await
            .is_err());
        assert_eq!(repo.stage_runs().len(), 1);
    }
}
