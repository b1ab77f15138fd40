//! Publishing seam used by the orchestrator and the stage workers.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::QueueResult;

/// Result of a publish call that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored by the broker under this entry id.
    Delivered(String),
    /// Every attempt failed and the fail-open policy swallowed the error.
    Dropped,
}

impl PublishOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, PublishOutcome::Delivered(_))
    }
}

/// Anything that can put a payload on a named queue.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<PublishOutcome>;
}

/// Serialize `message` as JSON and publish it.
pub async fn publish_json<T>(
    publisher: &dyn Publisher,
    queue: &str,
    message: &T,
) -> QueueResult<PublishOutcome>
where
    T: Serialize + Sync + ?Sized,
{
    let payload = serde_json::to_vec(message)?;
    publisher.publish(queue, &payload).await
}
