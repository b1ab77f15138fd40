//! Consumer entry point for a stage queue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn, Instrument};
use vpipe_models::message::MessageError;
use vpipe_models::{Classify, RetryPolicy, RetryRejection, StageMessage};
use vpipe_queue::{Disposition, MessageHandler};

use crate::logging::StageLogger;
use crate::metrics;
use crate::template::StageWorker;

/// Applies the retry guards to a stage message, runs the template, and turns
/// the result into a broker disposition.
pub struct StageHandler {
    worker: Arc<StageWorker>,
    policy: RetryPolicy,
}

impl StageHandler {
    pub fn new(worker: Arc<StageWorker>, policy: RetryPolicy) -> Self {
        Self { worker, policy }
    }

    fn parse(payload: &[u8]) -> Result<StageMessage, MessageError> {
        let message: StageMessage = serde_json::from_slice(payload)?;
        if message.video_id.is_empty() && message.filename.is_empty() {
            return Err(MessageError::MissingVideoId);
        }
        Ok(message)
    }

    /// Decide how to settle a payload at `now`.
    pub async fn decide(&self, payload: &[u8], now: DateTime<Utc>) -> Disposition {
        let message = match Self::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(stage = %self.worker.stage(), "Dropping message: {}", e);
                return Disposition::Reject(e.to_string());
            }
        };

        match self.policy.check(&message.retry, now) {
            Ok(()) => {}
            Err(rejection @ RetryRejection::TooEarly { .. }) => {
                debug!(video_id = %message.video_id, "Deferring message: {}", rejection);
                return Disposition::Defer;
            }
            Err(rejection) => {
                warn!(video_id = %message.video_id, "Dropping message: {}", rejection);
                return Disposition::Reject(rejection.to_string());
            }
        }

        let span = StageLogger::new(&message.video_id, self.worker.stage()).create_span();
        let result = self.worker.execute(&message).instrument(span).await;

        match result {
            Ok(outcome) => {
                debug!(
                    video_id = %outcome.video_id,
                    bucket_path = %outcome.bucket_path,
                    "Stage handled"
                );
                Disposition::Ack
            }
            Err(e) if e.is_retryable() => match serde_json::to_vec(&message.retried(now)) {
                Ok(body) => {
                    warn!(
                        video_id = %message.video_id,
                        retry_count = message.retry.retry_count,
                        "Transient failure, retrying: {}", e
                    );
                    Disposition::Retry(body)
                }
                Err(encode) => {
                    error!(
                        video_id = %message.video_id,
                        "Failed to encode retry payload: {}",
                        encode
                    );
                    Disposition::Defer
                }
            },
            Err(e) => {
                error!(
                    video_id = %message.video_id,
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
impl MessageHandler for StageHandler {
    async fn handle(&self, payload: &[u8]) -> Disposition {
        let disposition = self.decide(payload, Utc::now()).await;
        metrics::record_decision(self.worker.stage().as_str(), disposition.as_str());
        disposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vpipe_db::MemoryVideoRepository;
    use vpipe_media::{MediaError, MediaResult, VideoProcessingService};
    use vpipe_models::{Stage, Video, VideoId, VideoStatus};
    use vpipe_queue::MemoryPublisher;
    use vpipe_storage::MemoryStorage;

    use crate::notifier::QueueNotifier;

    struct Passthrough;

    #[async_trait]
    impl VideoProcessingService for Passthrough {
        fn name(&self) -> &'static str {
            "passthrough"
        }

        async fn transform(&self, input: Vec<u8>) -> MediaResult<Vec<u8>> {
            if input.is_empty() {
                return Err(MediaError::EmptyInput);
            }
            Ok(input)
        }
    }

    struct Fixture {
        videos: Arc<MemoryVideoRepository>,
        storage: Arc<MemoryStorage>,
        publisher: Arc<MemoryPublisher>,
        handler: StageHandler,
    }

    fn fixture() -> Fixture {
        let mut video = Video::new(VideoId::from("123"), "video123.mp4");
        video.status = VideoStatus::Trimming;
        let videos = Arc::new(MemoryVideoRepository::with_videos([video]));
        let storage = Arc::new(MemoryStorage::new());
        storage.put("uploads", "video123.mp4", vec![1u8, 2, 3]);
        let publisher = Arc::new(MemoryPublisher::new());

        let worker = StageWorker::new(
            Stage::Trim,
            videos.clone(),
            storage.clone(),
            Arc::new(Passthrough),
            Arc::new(QueueNotifier::new(publisher.clone(), "orchestrator_queue")),
        );
        let handler =
            StageHandler::new(Arc::new(worker), RetryPolicy::new(5, Duration::from_secs(300)));

        Fixture {
            videos,
            storage,
            publisher,
            handler,
        }
    }

    fn payload(retry_count: u32, max_retries: u32, last_retry: Option<DateTime<Utc>>) -> Vec<u8> {
        let mut msg = StageMessage::new(VideoId::from("123"), "video123.mp4", max_retries);
        msg.retry.retry_count = retry_count;
        msg.retry.last_retry = last_retry;
        serde_json::to_vec(&msg).unwrap()
    }

    #[tokio::test]
    async fn test_success_is_acked() {
        let f = fixture();
        let disposition = f.handler.decide(&payload(0, 5, None), Utc::now()).await;
        assert_eq!(disposition, Disposition::Ack);
        assert!(f.storage.get("trim", "video123.mp4").is_some());
        assert_eq!(f.publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_rejected_without_running() {
        let f = fixture();
        let disposition = f.handler.decide(&payload(5, 5, None), Utc::now()).await;

        assert!(matches!(disposition, Disposition::Reject(_)));
        assert!(f.videos.stage_runs().is_empty());
    }

    #[tokio::test]
    async fn test_zero_budget_uses_worker_default() {
        let f = fixture();
        let disposition = f.handler.decide(&payload(4, 0, None), Utc::now()).await;
        assert_eq!(disposition, Disposition::Ack);

        let disposition = f.handler.decide(&payload(5, 0, None), Utc::now()).await;
        assert!(matches!(disposition, Disposition::Reject(_)));
    }

    #[tokio::test]
    async fn test_early_redelivery_is_deferred() {
        let f = fixture();
        let now = Utc::now();
        let disposition = f
            .handler
            .decide(&payload(1, 5, Some(now - chrono::Duration::seconds(10))), now)
            .await;

        assert_eq!(disposition, Disposition::Defer);
        assert!(f.videos.stage_runs().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_with_increment() {
        let f = fixture();
        f.storage.fail_downloads("uploads");
        let now = Utc::now();

        match f.handler.decide(&payload(1, 5, None), now).await {
            Disposition::Retry(body) => {
                let retried: StageMessage = serde_json::from_slice(&body).unwrap();
                assert_eq!(retried.retry.retry_count, 2);
                assert_eq!(retried.retry.last_retry, Some(now));
                assert_eq!(retried.video_id.as_str(), "123");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(f.videos.get("123").unwrap().status, VideoStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_video_is_rejected() {
        let f = fixture();
        let body = br#"{"video_id":"999","filename":"missing.mp4"}"#;

        match f.handler.decide(body, Utc::now()).await {
            Disposition::Reject(reason) => assert!(reason.starts_with("find video: ")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected() {
        let f = fixture();
        for body in [&b""[..], b"not json", b"{}", br#"{"video_id":"","filename":""}"#] {
            match f.handler.decide(body, Utc::now()).await {
                Disposition::Reject(reason) => {
                    assert!(reason.starts_with("Invalid message format"), "{}", reason)
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
        assert!(f.videos.stage_runs().is_empty());
    }
}
