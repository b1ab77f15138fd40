//! Worker configuration.

use std::net::SocketAddr;

use vpipe_media::MediaConfig;
use vpipe_models::{RetryPolicy, Stage};
use vpipe_queue::{retry_policy_from_env, BrokerConfig, ConsumerConfig, QueueNames};

use crate::error::{StageError, StageResult};

/// Default attempt budget for stage messages.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stage this process runs
    pub stage: Stage,
    /// Bucket the stage reads from
    pub input_bucket: String,
    /// Bucket the stage writes to
    pub output_bucket: String,
    pub broker: BrokerConfig,
    pub queues: QueueNames,
    pub consumer: ConsumerConfig,
    /// Guards applied to inbound stage messages
    pub retry: RetryPolicy,
    pub media: MediaConfig,
    /// Prometheus listener, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl WorkerConfig {
    /// Defaults for `stage`, with buckets taken from the stage table.
    pub fn for_stage(stage: Stage) -> Self {
        Self {
            stage,
            input_bucket: stage.default_input_bucket().to_string(),
            output_bucket: stage.default_output_bucket().to_string(),
            broker: BrokerConfig::default(),
            queues: QueueNames::default(),
            consumer: ConsumerConfig::default(),
            retry: RetryPolicy::new(DEFAULT_MAX_RETRIES, RetryPolicy::default().retry_delay),
            media: MediaConfig::default(),
            metrics_addr: None,
        }
    }

    /// Create config from environment variables.
    ///
    /// `STAGE` is required.
    pub fn from_env() -> StageResult<Self> {
        let stage: Stage = std::env::var("STAGE")
            .map_err(|_| StageError::config_error("STAGE must be set"))?
            .parse()
            .map_err(|e| StageError::config_error(format!("{}", e)))?;

        Ok(Self {
            stage,
            input_bucket: std::env::var("INPUT_BUCKET")
                .unwrap_or_else(|_| stage.default_input_bucket().to_string()),
            output_bucket: std::env::var("OUTPUT_BUCKET")
                .unwrap_or_else(|_| stage.default_output_bucket().to_string()),
            broker: BrokerConfig::from_env(),
            queues: QueueNames::from_env(),
            consumer: ConsumerConfig::from_env(&format!("worker-{}", stage)),
            retry: retry_policy_from_env(DEFAULT_MAX_RETRIES),
            media: MediaConfig::from_env(),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        })
    }

    /// Queue this worker consumes.
    pub fn queue(&self) -> &str {
        self.queues.for_stage(self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_defaults() {
        let config = WorkerConfig::for_stage(Stage::RemoveAudio);
        assert_eq!(config.input_bucket, "edit");
        assert_eq!(config.output_bucket, "audio-removal");
        assert_eq!(config.queue(), "audio_removal_queue");
        assert_eq!(config.retry.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_queue_follows_stage() {
        for stage in Stage::ALL {
            let config = WorkerConfig::for_stage(stage);
            assert_eq!(config.queue(), stage.default_queue());
        }
    }
}
