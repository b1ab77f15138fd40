//! In-process publisher for tests and dry runs.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{QueueError, QueueResult};
use crate::publisher::{PublishOutcome, Publisher};

/// Publisher that records every payload instead of talking to a broker.
///
/// Queues marked with [`MemoryPublisher::fail_queue`] return a transport error.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish to `queue` fail.
    pub fn fail_queue(&self, queue: impl Into<String>) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(queue.into());
        }
    }

    /// Snapshot of `(queue, payload)` pairs in publish order.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Decoded messages published to `queue`.
    pub fn messages<T: DeserializeOwned>(&self, queue: &str) -> Vec<T> {
        self.published()
            .into_iter()
            .filter(|(q, _)| q == queue)
            .filter_map(|(_, payload)| serde_json::from_slice(&payload).ok())
            .collect()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<PublishOutcome> {
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(queue))
            .unwrap_or(false);
        if failing {
            return Err(QueueError::connection_failed(format!(
                "broker unreachable while publishing to {}",
                queue
            )));
        }

        let mut published = self
            .published
            .lock()
            .map_err(|_| QueueError::publish_failed("publisher state poisoned"))?;
        published.push((queue.to_string(), payload.to_vec()));
        Ok(PublishOutcome::Delivered(format!("{}-0", published.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::publish_json;

    #[tokio::test]
    async fn test_records_in_order() {
        let publisher = MemoryPublisher::new();
        publish_json(&publisher, "a", &serde_json::json!({"n": 1})).await.unwrap();
        publish_json(&publisher, "b", &serde_json::json!({"n": 2})).await.unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "a");
        let values: Vec<serde_json::Value> = publisher.messages("b");
        assert_eq!(values, vec![serde_json::json!({"n": 2})]);
    }

    #[tokio::test]
    async fn test_failing_queue() {
        let publisher = MemoryPublisher::new();
        publisher.fail_queue("a");
        assert!(publisher.publish("a", b"{}").await.is_err());
        assert!(publisher.publish("b", b"{}").await.is_ok());
        assert_eq!(publisher.published().len(), 1);
    }
}
