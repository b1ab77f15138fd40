//! Retry governor in front of the orchestrator.
//!
//! Every message on the orchestrator queue passes through here. A message is
//! parsed, checked against the retry policy, routed to the orchestrator, and
//! the outcome is turned into a broker disposition from the error kind alone.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use vpipe_models::message::MessageError;
use vpipe_models::{Classify, ErrorKind, InboundMessage, RetryPolicy, RetryRejection, VideoStatus};
use vpipe_queue::{Disposition, MessageHandler};

use crate::error::OrchestratorError;
use crate::metrics;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Error)]
pub enum GovernorError {
    #[error(transparent)]
    Invalid(#[from] MessageError),

    #[error(transparent)]
    Rejected(#[from] RetryRejection),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl Classify for GovernorError {
    fn kind(&self) -> ErrorKind {
        match self {
            GovernorError::Invalid(e) => e.kind(),
            GovernorError::Rejected(RetryRejection::Exhausted { .. }) => ErrorKind::Permanent,
            GovernorError::Rejected(RetryRejection::TooEarly { .. }) => ErrorKind::Transient,
            GovernorError::Orchestrator(e) => e.kind(),
        }
    }
}

/// Consumer entry point for the orchestrator queue.
pub struct OrchestratorHandler {
    orchestrator: Arc<Orchestrator>,
    policy: RetryPolicy,
}

impl OrchestratorHandler {
    pub fn new(orchestrator: Arc<Orchestrator>, policy: RetryPolicy) -> Self {
        Self {
            orchestrator,
            policy,
        }
    }

    /// Parse a payload and apply the retry guards.
    pub fn admit(
        &self,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<InboundMessage, GovernorError> {
        let message = InboundMessage::parse(payload)?;
        self.policy.check(message.retry(), now)?;
        Ok(message)
    }

    /// Route an admitted message to the matching orchestrator edge.
    pub async fn dispatch(
        &self,
        message: &InboundMessage,
    ) -> Result<VideoStatus, OrchestratorError> {
        match message {
            InboundMessage::Start(start) => self.orchestrator.start(&start.video_id).await,
            InboundMessage::StageCompleted(done) => {
                let stage = done.completed_stage();
                debug!(
                    video_id = %done.video_id,
                    stage = %stage,
                    bucket_path = %done.bucket_path,
                    "Routing completion"
                );
                self.orchestrator
                    .on_stage_completed(stage, &done.video_id, &done.filename)
                    .await
            }
        }
    }

    /// Admit and dispatch one payload.
    pub async fn process(
        &self,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<VideoStatus, GovernorError> {
        let message = self.admit(payload, now)?;
        Ok(self.dispatch(&message).await?)
    }

    /// Decide how to settle a payload at `now`.
    pub async fn decide(&self, payload: &[u8], now: DateTime<Utc>) -> Disposition {
        let message = match self.admit(payload, now) {
            Ok(message) => message,
            Err(GovernorError::Rejected(rejection @ RetryRejection::TooEarly { .. })) => {
                debug!("Deferring message: {}", rejection);
                return Disposition::Defer;
            }
            Err(e) => {
                warn!("Dropping message: {}", e);
                return Disposition::Reject(e.to_string());
            }
        };

        let video_id = message.video_id().clone();
        let retry_count = message.retry().retry_count;

        match self.dispatch(&message).await {
            Ok(status) => {
                debug!(video_id = %video_id, status = %status, "Message handled");
                Disposition::Ack
            }
            Err(e) if e.is_already_advanced() => {
                info!(video_id = %video_id, "Ignoring stale message: {}", e);
                Disposition::Ack
            }
            Err(e) if e.is_retryable() => match message.retried_payload(now) {
                Ok(body) => {
                    warn!(video_id = %video_id, retry_count, "Transient failure, retrying: {}", e);
                    Disposition::Retry(body)
                }
                Err(encode) => {
                    error!(video_id = %video_id, "Failed to encode retry payload: {}", encode);
                    Disposition::Defer
                }
            },
            Err(e) => {
                error!(
                    video_id = %video_id,
                    kind = %e.kind(),
                    "Permanent failure, dropping message: {}",
                    e
                );
                Disposition::Reject(e.to_string())
            }
        }
    }
}

#[async_trait]
impl MessageHandler for OrchestratorHandler {
    async fn handle(&self, payload: &[u8]) -> Disposition {
        let disposition = self.decide(payload, Utc::now()).await;
        metrics::record_decision(disposition.as_str());
        disposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use std::time::Duration;
    use vpipe_db::{MemoryVideoRepository, RepositoryError, RepositoryResult, VideoRepository};
    use vpipe_models::{Stage, StageCompletedMessage, StageMessage, StageRunStatus, Video, VideoId};
    use vpipe_queue::{MemoryPublisher, QueueNames};

    struct Fixture {
        repo: Arc<MemoryVideoRepository>,
        publisher: Arc<MemoryPublisher>,
        handler: OrchestratorHandler,
    }

    fn fixture(status: VideoStatus) -> Fixture {
        let mut video = Video::new(VideoId::from("123"), "video123.mp4");
        video.status = status;
        let repo = Arc::new(MemoryVideoRepository::with_videos([video]));
        let publisher = Arc::new(MemoryPublisher::new());
        let orchestrator = Arc::new(Orchestrator::new(
            repo.clone(),
            publisher.clone(),
            QueueNames::default(),
        ));
        let handler =
            OrchestratorHandler::new(orchestrator, RetryPolicy::new(3, Duration::from_secs(300)));
        Fixture {
            repo,
            publisher,
            handler,
        }
    }

    fn start_payload(retry_count: u32, last_retry: Option<DateTime<Utc>>) -> Vec<u8> {
        let mut msg = StageMessage::new(VideoId::from("123"), "video123.mp4", 3);
        msg.retry.retry_count = retry_count;
        msg.retry.last_retry = last_retry;
        serde_json::to_vec(&msg).unwrap()
    }

    #[tokio::test]
    async fn test_start_message_is_acked() {
        let f = fixture(VideoStatus::Uploaded);
        let disposition = f.handler.decide(&start_payload(0, None), Utc::now()).await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(f.repo.get("123").unwrap().status, VideoStatus::Trimming);
    }

    #[tokio::test]
    async fn test_max_retries_rejected_without_orchestrator() {
        let f = fixture(VideoStatus::Uploaded);
        let disposition = f.handler.decide(&start_payload(3, None), Utc::now()).await;

        match disposition {
            Disposition::Reject(reason) => assert!(reason.contains("Max retries exceeded")),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(f.publisher.published().is_empty());
        assert!(f.repo.status_writes().is_empty());
    }

    #[tokio::test]
    async fn test_retry_delay_defers_without_increment() {
        let f = fixture(VideoStatus::Uploaded);
        let now = Utc::now();
        let payload = start_payload(1, Some(now - chrono::Duration::seconds(30)));

        let err = f.handler.process(&payload, now).await.unwrap_err();
        assert!(err.to_string().contains("retry delay not met"));
        assert!(err.is_retryable());

        assert_eq!(f.handler.decide(&payload, now).await, Disposition::Defer);
        assert!(f.publisher.published().is_empty());
        assert!(f.repo.status_writes().is_empty());
    }

    #[tokio::test]
    async fn test_retry_delay_elapsed_proceeds() {
        let f = fixture(VideoStatus::Uploaded);
        let now = Utc::now();
        let payload = start_payload(1, Some(now - chrono::Duration::minutes(6)));
        assert_eq!(f.handler.decide(&payload, now).await, Disposition::Ack);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_permanent() {
        let f = fixture(VideoStatus::Uploaded);
        for payload in [&b"{not json"[..], b"", b"42", b"{\"filename\":\"a.mp4\"}"] {
            let err = f.handler.process(payload, Utc::now()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Permanent);

            match f.handler.decide(payload, Utc::now()).await {
                Disposition::Reject(reason) => assert!(reason.contains("Invalid message format")),
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_completion_routed_by_bucket_path() {
        let f = fixture(VideoStatus::Trimming);
        let payload = br#"{"video_id":"123","filename":"video123.mp4","bucket_path":"trim/video123.mp4","status":"COMPLETED","retry_count":0,"max_retries":3,"last_retry":null}"#;

        assert_eq!(f.handler.decide(payload, Utc::now()).await, Disposition::Ack);
        assert_eq!(f.publisher.messages::<StageMessage>("edit_video_queue").len(), 1);
        assert_eq!(f.repo.get("123").unwrap().status, VideoStatus::AdjustingResolution);
    }

    #[tokio::test]
    async fn test_unknown_bucket_path_routes_to_final_stage() {
        let f = fixture(VideoStatus::AddingIntroOutro);
        let payload = br#"{"video_id":"123","filename":"x.mp4","bucket_path":"unknown/x.mp4","status":"COMPLETED"}"#;

        let status = f.handler.process(payload, Utc::now()).await.unwrap();
        assert_eq!(status, VideoStatus::Processed);
        assert_eq!(f.repo.get("123").unwrap().processed_file.as_deref(), Some("x.mp4"));
    }

    #[tokio::test]
    async fn test_completion_routed_by_stage_tag() {
        let f = fixture(VideoStatus::AddingWatermark);
        let msg = StageCompletedMessage::new(
            Stage::Watermark,
            VideoId::from("123"),
            "video123.mp4",
            "watermarking/video123.mp4",
        );
        let payload = serde_json::to_vec(&msg).unwrap();

        assert_eq!(
            f.handler.process(&payload, Utc::now()).await.unwrap(),
            VideoStatus::AddingIntroOutro
        );
        assert_eq!(f.publisher.messages::<StageMessage>("gossip_video_queue").len(), 1);
    }

    #[tokio::test]
    async fn test_completion_retry_guard_applies() {
        let f = fixture(VideoStatus::Trimming);
        let payload = br#"{"video_id":"123","filename":"a.mp4","bucket_path":"trim/a.mp4","retry_count":5,"max_retries":5}"#;
        assert!(matches!(f.handler.decide(payload, Utc::now()).await, Disposition::Reject(_)));
        assert!(f.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_retries_with_increment() {
        let f = fixture(VideoStatus::Uploaded);
        f.publisher.fail_queue("trim_video_queue");
        let now = Utc::now();

        match f.handler.decide(&start_payload(0, None), now).await {
            Disposition::Retry(body) => {
                let retried: StageMessage = serde_json::from_slice(&body).unwrap();
                assert_eq!(retried.retry.retry_count, 1);
                assert_eq!(retried.retry.last_retry, Some(now));
                assert_eq!(retried.retry.max_retries, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(f.repo.get("123").unwrap().status, VideoStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_missing_video_is_dropped() {
        let f = fixture(VideoStatus::Uploaded);
        let payload = br#"{"video_id":"999","filename":"nope.mp4"}"#;

        let err = f.handler.process(payload, Utc::now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(matches!(f.handler.decide(payload, Utc::now()).await, Disposition::Reject(_)));
    }

    mock! {
        pub Videos {}

        #[async_trait]
        impl VideoRepository for Videos {
            async fn find_by_id(&self, id: &VideoId) -> RepositoryResult<Video>;
            async fn find_by_filename(&self, filename: &str) -> RepositoryResult<Video>;
            async fn update_status(
                &self,
                id: &VideoId,
                status: VideoStatus,
            ) -> RepositoryResult<()>;
            async fn update_status_and_processed_file(
                &self,
                id: &VideoId,
                status: VideoStatus,
                processed_file: &str,
            ) -> RepositoryResult<()>;
            async fn record_stage_run(
                &self,
                id: &VideoId,
                stage: Stage,
                status: StageRunStatus,
            ) -> RepositoryResult<()>;
            async fn last_completed_stage(
                &self,
                id: &VideoId,
            ) -> RepositoryResult<Option<Stage>>;
        }
    }

    fn handler_with(videos: MockVideos) -> OrchestratorHandler {
        let orchestrator = Orchestrator::new(
            Arc::new(videos),
            Arc::new(MemoryPublisher::new()),
            QueueNames::default(),
        );
        OrchestratorHandler::new(Arc::new(orchestrator), RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_constraint_violation_is_dropped() {
        let mut videos = MockVideos::new();
        videos.expect_find_by_id().returning(|id| {
            let mut video = Video::new(id.clone(), "video123.mp4");
            video.status = VideoStatus::AddingIntroOutro;
            Ok(video)
        });
        videos
            .expect_update_status_and_processed_file()
            .times(1)
            .returning(|_, _, _| {
                Err(RepositoryError::constraint_violation(
                    "new row violates check constraint videos_processed_file_iff_processed",
                ))
            });

        let handler = handler_with(videos);
        let payload = br#"{"video_id":"123","filename":"final.mp4","stage":"intro_outro"}"#;

        match handler.decide(payload, Utc::now()).await {
            Disposition::Reject(reason) => {
                assert!(reason.starts_with("update status: constraint violation"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_id_is_dropped() {
        let mut videos = MockVideos::new();
        videos
            .expect_find_by_id()
            .returning(|id| Err(RepositoryError::invalid_id(id.as_str())));
        videos.expect_update_status().never();

        let handler = handler_with(videos);
        let payload = br#"{"video_id":"not-a-uuid","filename":"a.mp4"}"#;

        let err = handler.process(payload, Utc::now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(err.to_string().starts_with("find video: invalid video id format"));
        assert!(matches!(handler.decide(payload, Utc::now()).await, Disposition::Reject(_)));
    }

    #[tokio::test]
    async fn test_database_outage_is_retried() {
        let mut videos = MockVideos::new();
        videos
            .expect_find_by_id()
            .returning(|_| Err(RepositoryError::unavailable("pool timed out")));

        let handler = handler_with(videos);
        let disposition = handler.decide(&start_payload(0, None), Utc::now()).await;
        assert!(matches!(disposition, Disposition::Retry(_)));
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_acked() {
        let f = fixture(VideoStatus::RemovingAudio);
        let payload = br#"{"video_id":"123","filename":"video123.mp4","bucket_path":"trim/video123.mp4"}"#;
        assert_eq!(f.handler.decide(payload, Utc::now()).await, Disposition::Ack);
        assert!(f.publisher.published().is_empty());
    }
}
