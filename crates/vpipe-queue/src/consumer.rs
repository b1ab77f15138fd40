//! Consumer loop shared by the orchestrator and the stage workers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Delivery};
use crate::config::ConsumerConfig;
use crate::error::{QueueError, QueueResult};
use crate::metrics;

/// How a handled delivery is settled with the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; remove it.
    Ack,
    /// Put this updated body back on the queue and remove the original.
    Retry(Vec<u8>),
    /// Leave it pending; it is reclaimed unchanged after the idle timeout.
    Defer,
    /// Give up: dead-letter it when the queue has a DLQ, then remove it.
    Reject(String),
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Retry(_) => "retry",
            Disposition::Defer => "defer",
            Disposition::Reject(_) => "reject",
        }
    }
}

/// Application side of a consumer.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one raw payload and say how to settle it.
    async fn handle(&self, payload: &[u8]) -> Disposition;
}

/// Reads one queue and drives a [`MessageHandler`] with bounded concurrency.
pub struct Consumer {
    broker: Arc<Broker>,
    queue: String,
    config: ConsumerConfig,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl Consumer {
    pub fn new(broker: Arc<Broker>, queue: impl Into<String>, config: ConsumerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        let (shutdown, _) = watch::channel(false);

        Self {
            broker,
            queue: queue.into(),
            config,
            semaphore,
            shutdown,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Consume until [`Consumer::shutdown`] is called.
    ///
    /// Declares the queue first, then reads new deliveries in a loop while a
    /// background task periodically reclaims abandoned ones.
    pub async fn run<H: MessageHandler>(&self, handler: Arc<H>) -> QueueResult<()> {
        info!(
            queue = %self.queue,
            consumer = %self.config.consumer_name,
            max_concurrent = self.config.max_concurrent,
            "Starting consumer"
        );

        let spec = self.broker.spec(&self.queue).await;
        self.broker
            .ensure_queue(&self.queue, spec.max_length, spec.dead_letter)
            .await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_task(Arc::clone(&handler));

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(queue = %self.queue, "Shutdown signal received, stopping consumer");
                        break;
                    }
                }
                result = self.consume_batch(&handler) => {
                    if let Err(e) = result {
                        error!(queue = %self.queue, "Error consuming messages: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!(queue = %self.queue, "Waiting for in-flight messages to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_in_flight())
            .await
            .is_err()
        {
            warn!(queue = %self.queue, "Shutdown timeout reached with messages still in flight");
        }

        info!(queue = %self.queue, "Consumer stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    fn spawn_claim_task<H: MessageHandler>(&self, handler: Arc<H>) -> tokio::task::JoinHandle<()> {
        let broker = Arc::clone(&self.broker);
        let queue = self.queue.clone();
        let config = self.config.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let available = semaphore.available_permits();
                        if available == 0 {
                            continue;
                        }
                        let claimed = broker
                            .claim_stale(
                                &queue,
                                &config.consumer_name,
                                config.claim_min_idle,
                                available.min(config.batch_size),
                            )
                            .await;
                        match claimed {
                            Ok(deliveries) => {
                                for delivery in deliveries {
                                    let semaphore = Arc::clone(&semaphore);
                                    let Ok(permit) = semaphore.acquire_owned().await else {
                                        break;
                                    };
                                    let broker = Arc::clone(&broker);
                                    let handler = Arc::clone(&handler);
                                    let queue = queue.clone();
                                    let config = config.clone();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::process(broker, handler, queue, config, delivery)
                                            .await;
                                    });
                                }
                            }
                            Err(e) => {
                                warn!(queue = %queue, "Failed to claim pending messages: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Read up to the number of free slots and spawn a task per delivery.
    async fn consume_batch<H: MessageHandler>(&self, handler: &Arc<H>) -> QueueResult<()> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .broker
            .consume(
                &self.queue,
                &self.config.consumer_name,
                self.config.block,
                available.min(self.config.batch_size),
            )
            .await?;

        for delivery in deliveries {
            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| QueueError::connection_failed("consumer semaphore closed"))?;
            let broker = Arc::clone(&self.broker);
            let handler = Arc::clone(handler);
            let queue = self.queue.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                let _permit = permit;
                Self::process(broker, handler, queue, config, delivery).await;
            });
        }

        Ok(())
    }

    /// Handle one delivery, keeping ownership fresh while the handler runs,
    /// then settle it.
    async fn process<H: MessageHandler>(
        broker: Arc<Broker>,
        handler: Arc<H>,
        queue: String,
        config: ConsumerConfig,
        delivery: Delivery,
    ) {
        debug!(queue = %queue, message_id = %delivery.id, "Handling message");

        let disposition = {
            let handle = handler.handle(&delivery.payload);
            tokio::pin!(handle);

            let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    disposition = &mut handle => break disposition,
                    _ = heartbeat.tick() => {
                        let touched = broker
                            .touch(&queue, &config.consumer_name, &delivery.id)
                            .await;
                        if let Err(e) = touched {
                            warn!(
                                queue = %queue,
                                message_id = %delivery.id,
                                "Heartbeat failed: {}",
                                e
                            );
                        }
                    }
                }
            }
        };

        metrics::record_delivery(&queue, disposition.as_str());

        let result = match &disposition {
            Disposition::Ack => broker.ack(&queue, &delivery.id).await,
            Disposition::Retry(payload) => broker.requeue(&queue, &delivery.id, payload).await,
            Disposition::Defer => {
                debug!(queue = %queue, message_id = %delivery.id, "Deferred message left pending");
                Ok(())
            }
            Disposition::Reject(reason) => broker.reject(&queue, &delivery, reason).await,
        };

        if let Err(e) = result {
            error!(
                queue = %queue,
                message_id = %delivery.id,
                disposition = disposition.as_str(),
                "Failed to settle message, it will be reclaimed: {}",
                e
            );
        }
    }

    async fn wait_for_in_flight(&self) {
        loop {
            if self.semaphore.available_permits() == self.config.max_concurrent {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_labels() {
        assert_eq!(Disposition::Ack.as_str(), "ack");
        assert_eq!(Disposition::Retry(vec![1]).as_str(), "retry");
        assert_eq!(Disposition::Defer.as_str(), "defer");
        assert_eq!(Disposition::Reject("bad".into()).as_str(), "reject");
    }
}
