//! Broker adapter on Redis Streams.
//!
//! One queue is one stream read through a consumer group. Settlement maps to
//! stream commands: ack is `XACK` + `XDEL`, requeue re-adds an updated body,
//! defer leaves the entry pending until it is reclaimed, and reject copies the
//! entry to `<queue>:dlq`.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{BrokerConfig, PublishFailurePolicy};
use crate::error::{QueueError, QueueResult};
use crate::metrics;
use crate::publisher::{PublishOutcome, Publisher};

/// Stream field holding the message body.
const PAYLOAD_FIELD: &str = "payload";

/// Topology recorded for a declared queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    /// Publishes are refused at this length; `0` disables the bound
    pub max_length: u64,
    /// Rejected deliveries are copied to `<queue>:dlq`
    pub dead_letter: bool,
}

/// One entry read from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stream entry id
    pub id: String,
    /// Raw message body
    pub payload: Vec<u8>,
}

/// Redis Streams broker client.
///
/// Construct one per process and share it behind an `Arc`. The command
/// connection is created lazily and replaced under a mutex after a transport
/// failure. Each blocking read opens a connection of its own.
pub struct Broker {
    client: redis::Client,
    config: BrokerConfig,
    connection: Mutex<Option<MultiplexedConnection>>,
    queues: RwLock<HashMap<String, QueueSpec>>,
}

impl Broker {
    /// Create a new broker client. Does not connect.
    pub fn new(config: BrokerConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            connection: Mutex::new(None),
            queues: RwLock::new(HashMap::new()),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(BrokerConfig::from_env())
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Shared connection, established on first use or after a reset.
    async fn connection(&self) -> QueueResult<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        info!("Connected to broker");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection if `err` means it is unusable.
    async fn observe(&self, err: &QueueError) {
        if err.is_connection_error() {
            warn!("Broker connection lost, reconnecting on next use: {}", err);
            *self.connection.lock().await = None;
        }
    }

    /// Run a command against the shared connection, resetting it on transport errors.
    async fn with_connection<T, F, Fut>(&self, op: F) -> QueueResult<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = Result<T, redis::RedisError>>,
    {
        let conn = self.connection().await?;
        match op(conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = QueueError::Redis(e);
                self.observe(&err).await;
                Err(err)
            }
        }
    }

    /// Topology for `queue`, falling back to the configured defaults.
    pub async fn spec(&self, queue: &str) -> QueueSpec {
        self.queues
            .read()
            .await
            .get(queue)
            .cloned()
            .unwrap_or(QueueSpec {
                max_length: self.config.queue_max_length,
                dead_letter: self.config.dlq_enabled,
            })
    }

    /// Declare a queue. Idempotent.
    ///
    /// Creates the stream and its consumer group, and the dead-letter stream
    /// with its own group when `with_dlq` is set.
    pub async fn ensure_queue(
        &self,
        name: &str,
        max_length: u64,
        with_dlq: bool,
    ) -> QueueResult<()> {
        let group = self.config.group_for(name);
        self.create_group(name, &group).await?;
        if with_dlq {
            self.create_group(&BrokerConfig::dlq_for(name), &group).await?;
        }

        self.queues.write().await.insert(
            name.to_string(),
            QueueSpec {
                max_length,
                dead_letter: with_dlq,
            },
        );
        info!(queue = %name, max_length, dead_letter = with_dlq, "Queue declared");
        Ok(())
    }

    async fn create_group(&self, stream: &str, group: &str) -> QueueResult<()> {
        let result = self
            .with_connection(|mut conn| async move {
                redis::cmd("XGROUP")
                    .arg("CREATE")
                    .arg(stream)
                    .arg(group)
                    .arg("0")
                    .arg("MKSTREAM")
                    .query_async::<()>(&mut conn)
                    .await
            })
            .await;

        match result {
            Ok(()) => {
                info!("Created consumer group {} on {}", group, stream);
                Ok(())
            }
            Err(QueueError::Redis(e)) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group {} already exists on {}", group, stream);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Single publish attempt honouring the queue bound.
    pub async fn try_publish(&self, queue: &str, payload: &[u8]) -> QueueResult<String> {
        let spec = self.spec(queue).await;

        if spec.max_length > 0 {
            let len = self.len(queue).await?;
            if len >= spec.max_length {
                return Err(QueueError::QueueFull {
                    queue: queue.to_string(),
                    max_length: spec.max_length,
                });
            }
        }

        let message_id: String = self
            .with_connection(|mut conn| async move {
                redis::cmd("XADD")
                    .arg(queue)
                    .arg("*")
                    .arg(PAYLOAD_FIELD)
                    .arg(payload)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        debug!(queue = %queue, message_id = %message_id, "Published message");
        Ok(message_id)
    }

    /// Publish with linear backoff retries.
    ///
    /// A full queue is returned immediately. Transport failures are retried
    /// `publish_retries` times, sleeping `step`, `2 * step`, ... before each
    /// retry. Once exhausted, the failure policy decides between an error
    /// and [`PublishOutcome::Dropped`].
    pub async fn publish_with_retry(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> QueueResult<PublishOutcome> {
        retry_publish(&self.config, queue, || self.try_publish(queue, payload)).await
    }

    /// Acknowledge a delivery and remove it from the stream.
    pub async fn ack(&self, queue: &str, message_id: &str) -> QueueResult<()> {
        let group = self.config.group_for(queue);
        self.with_connection(|mut conn| async move {
            redis::cmd("XACK")
                .arg(queue)
                .arg(&group)
                .arg(message_id)
                .query_async::<()>(&mut conn)
                .await?;
            redis::cmd("XDEL")
                .arg(queue)
                .arg(message_id)
                .query_async::<()>(&mut conn)
                .await
        })
        .await?;

        debug!(queue = %queue, message_id = %message_id, "Acknowledged message");
        Ok(())
    }

    /// Put an updated body back on the queue and ack the original entry.
    ///
    /// If the re-add fails the original stays pending and is reclaimed later.
    pub async fn requeue(&self, queue: &str, message_id: &str, payload: &[u8]) -> QueueResult<()> {
        let new_id = self.try_publish(queue, payload).await?;
        self.ack(queue, message_id).await?;
        debug!(queue = %queue, message_id = %message_id, new_id = %new_id, "Requeued message");
        Ok(())
    }

    /// Copy a delivery to the dead-letter stream and ack the original.
    pub async fn dead_letter(
        &self,
        queue: &str,
        delivery: &Delivery,
        reason: &str,
    ) -> QueueResult<()> {
        let dlq = BrokerConfig::dlq_for(queue);
        let payload = delivery.payload.as_slice();
        let original_id = delivery.id.as_str();
        self.with_connection(|mut conn| async move {
            redis::cmd("XADD")
                .arg(&dlq)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(payload)
                .arg("error")
                .arg(reason)
                .arg("original_id")
                .arg(original_id)
                .query_async::<()>(&mut conn)
                .await
        })
        .await?;

        self.ack(queue, &delivery.id).await?;
        warn!(queue = %queue, message_id = %delivery.id, "Moved message to DLQ: {}", reason);
        Ok(())
    }

    /// Drop a delivery for good: dead-letter it when the queue has a DLQ,
    /// otherwise just ack it.
    pub async fn reject(&self, queue: &str, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        if self.spec(queue).await.dead_letter {
            self.dead_letter(queue, delivery, reason).await
        } else {
            warn!(queue = %queue, message_id = %delivery.id, "Dropping message: {}", reason);
            self.ack(queue, &delivery.id).await
        }
    }

    /// Read new entries for this consumer, blocking up to `block`.
    pub async fn consume(
        &self,
        queue: &str,
        consumer_name: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let group = self.config.group_for(queue);
        // Blocking reads never run on the shared connection.
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(queue)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let deliveries: Vec<Delivery> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
            .map(|entry| to_delivery(queue, entry))
            .collect();

        if !deliveries.is_empty() {
            debug!(queue = %queue, count = deliveries.len(), "Consumed messages");
        }
        Ok(deliveries)
    }

    /// Take over entries idle for at least `min_idle`, e.g. from crashed
    /// consumers or deferred deliveries.
    pub async fn claim_stale(
        &self,
        queue: &str,
        consumer_name: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let group = self.config.group_for(queue);
        let reply: StreamAutoClaimReply = self
            .with_connection(|mut conn| async move {
                redis::cmd("XAUTOCLAIM")
                    .arg(queue)
                    .arg(&group)
                    .arg(consumer_name)
                    .arg(min_idle.as_millis() as u64)
                    .arg("0-0")
                    .arg("COUNT")
                    .arg(count)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        let deliveries: Vec<Delivery> = reply
            .claimed
            .into_iter()
            .map(|entry| to_delivery(queue, entry))
            .collect();

        if !deliveries.is_empty() {
            info!(queue = %queue, count = deliveries.len(), "Claimed stale messages");
        }
        Ok(deliveries)
    }

    /// Reset the idle time of an in-flight delivery so it is not reclaimed.
    pub async fn touch(
        &self,
        queue: &str,
        consumer_name: &str,
        message_id: &str,
    ) -> QueueResult<()> {
        let group = self.config.group_for(queue);
        self.with_connection(|mut conn| async move {
            redis::cmd("XCLAIM")
                .arg(queue)
                .arg(&group)
                .arg(consumer_name)
                .arg(0)
                .arg(message_id)
                .arg("JUSTID")
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }

    /// Get queue length.
    pub async fn len(&self, queue: &str) -> QueueResult<u64> {
        self.with_connection(|mut conn| async move { conn.xlen(queue).await })
            .await
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self, queue: &str) -> QueueResult<u64> {
        let dlq = BrokerConfig::dlq_for(queue);
        self.with_connection(|mut conn| async move { conn.xlen(&dlq).await })
            .await
    }
}

#[async_trait]
impl Publisher for Broker {
    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<PublishOutcome> {
        self.publish_with_retry(queue, payload).await
    }
}

/// Drive `attempt` under the retry and failure policy of `config`.
async fn retry_publish<F, Fut>(
    config: &BrokerConfig,
    queue: &str,
    mut attempt_once: F,
) -> QueueResult<PublishOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = QueueResult<String>>,
{
    let mut attempt = 0u32;

    loop {
        match attempt_once().await {
            Ok(message_id) => {
                metrics::record_published(queue);
                return Ok(PublishOutcome::Delivered(message_id));
            }
            Err(e @ QueueError::QueueFull { .. }) => {
                warn!(queue = %queue, "Publish refused: {}", e);
                return Err(e);
            }
            Err(e) if attempt < config.publish_retries => {
                attempt += 1;
                let delay = config.publish_backoff_step * attempt;
                warn!(
                    queue = %queue,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Publish failed, retrying: {}",
                    e
                );
                metrics::record_publish_retry(queue);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return match config.failure_policy {
                    PublishFailurePolicy::FailOpen => {
                        error!(
                            queue = %queue,
                            attempts = attempt + 1,
                            "Publish failed after all retries, message dropped: {}",
                            e
                        );
                        metrics::record_publish_dropped(queue);
                        Ok(PublishOutcome::Dropped)
                    }
                    PublishFailurePolicy::FailClosed => {
                        error!(
                            queue = %queue,
                            attempts = attempt + 1,
                            "Publish failed after all retries: {}",
                            e
                        );
                        Err(e)
                    }
                };
            }
        }
    }
}

fn to_delivery(queue: &str, entry: StreamId) -> Delivery {
    let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_else(|| {
        // Handlers reject an empty body, which settles the entry.
        warn!(queue = %queue, message_id = %entry.id, "Stream entry has no payload field");
        Vec::new()
    });
    Delivery {
        id: entry.id,
        payload,
    }
}
