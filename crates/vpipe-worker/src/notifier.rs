//! Completion notifications to the orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use vpipe_models::{Stage, StageCompletedMessage, VideoId};
use vpipe_queue::{publish_json, PublishOutcome, Publisher, QueueResult};

/// Tells the orchestrator that a stage produced its artifact.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify_video_processed(
        &self,
        stage: Stage,
        video_id: &VideoId,
        filename: &str,
        bucket_path: &str,
    ) -> QueueResult<()>;
}

/// Publishes a [`StageCompletedMessage`] to the orchestrator queue.
pub struct QueueNotifier {
    publisher: Arc<dyn Publisher>,
    queue: String,
}

impl QueueNotifier {
    pub fn new(publisher: Arc<dyn Publisher>, queue: impl Into<String>) -> Self {
        Self {
            publisher,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl NotificationService for QueueNotifier {
    async fn notify_video_processed(
        &self,
        stage: Stage,
        video_id: &VideoId,
        filename: &str,
        bucket_path: &str,
    ) -> QueueResult<()> {
        let message = StageCompletedMessage::new(stage, video_id.clone(), filename, bucket_path);

        match publish_json(self.publisher.as_ref(), &self.queue, &message).await? {
            PublishOutcome::Delivered(id) => {
                debug!(
                    video_id = %video_id,
                    queue = %self.queue,
                    message_id = %id,
                    "Completion published"
                );
            }
            PublishOutcome::Dropped => {
                warn!(
                    video_id = %video_id,
                    queue = %self.queue,
                    "Completion dropped after publish retries"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpipe_queue::MemoryPublisher;

    #[tokio::test]
    async fn test_notifies_orchestrator_queue_with_stage_tag() {
        let publisher = Arc::new(MemoryPublisher::new());
        let notifier = QueueNotifier::new(publisher.clone(), "orchestrator_queue");

        notifier
            .notify_video_processed(
                Stage::Trim,
                &VideoId::from("123"),
                "video123.mp4",
                "trim/video123.mp4",
            )
            .await
            .unwrap();

        let sent: Vec<StageCompletedMessage> = publisher.messages("orchestrator_queue");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].stage, Some(Stage::Trim));
        assert_eq!(sent[0].bucket_path, "trim/video123.mp4");
        assert_eq!(sent[0].status, "COMPLETED");
    }

    #[tokio::test]
    async fn test_publish_error_is_returned() {
        let publisher = Arc::new(MemoryPublisher::new());
        publisher.fail_queue("orchestrator_queue");
        let notifier = QueueNotifier::new(publisher, "orchestrator_queue");

        let result = notifier
            .notify_video_processed(Stage::Trim, &VideoId::from("123"), "a.mp4", "trim/a.mp4")
            .await;
        assert!(result.is_err());
    }
}
