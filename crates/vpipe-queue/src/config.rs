//! Broker, queue-name and consumer configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;
use vpipe_models::{RetryPolicy, Stage};

/// What `publish` does once every retry has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishFailurePolicy {
    /// Log, count and report success to the caller.
    #[default]
    FailOpen,
    /// Return the transport error to the caller.
    FailClosed,
}

impl PublishFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishFailurePolicy::FailOpen => "fail-open",
            PublishFailurePolicy::FailClosed => "fail-closed",
        }
    }
}

impl fmt::Display for PublishFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PublishFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-open" | "open" => Ok(PublishFailurePolicy::FailOpen),
            "fail-closed" | "closed" => Ok(PublishFailurePolicy::FailClosed),
            other => Err(format!("unknown publish failure policy: {}", other)),
        }
    }
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Redis URL
    pub redis_url: String,
    /// Consumer group override; defaults to `vpipe:<queue>`
    pub consumer_group: Option<String>,
    /// Queue length at which new publishes are refused
    pub queue_max_length: u64,
    /// Declare a dead-letter stream next to each queue
    pub dlq_enabled: bool,
    /// Retries after a failed first publish attempt
    pub publish_retries: u32,
    /// Linear backoff step between publish retries
    pub publish_backoff_step: Duration,
    /// Behaviour once publish retries are exhausted
    pub failure_policy: PublishFailurePolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            consumer_group: None,
            queue_max_length: 1000,
            dlq_enabled: true,
            publish_retries: 3,
            publish_backoff_step: Duration::from_secs(1),
            failure_policy: PublishFailurePolicy::FailOpen,
        }
    }
}

impl BrokerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").ok(),
            queue_max_length: std::env::var("QUEUE_MAX_LENGTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            dlq_enabled: std::env::var("QUEUE_DLQ_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            publish_retries: 3,
            publish_backoff_step: Duration::from_secs(1),
            failure_policy: std::env::var("PUBLISH_FAILURE_POLICY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }

    /// Consumer group used for `queue`.
    pub fn group_for(&self, queue: &str) -> String {
        self.consumer_group
            .clone()
            .unwrap_or_else(|| format!("vpipe:{}", queue))
    }

    /// Dead-letter stream name for `queue`.
    pub fn dlq_for(queue: &str) -> String {
        format!("{}:dlq", queue)
    }
}

/// Logical queue names, one per stage plus the orchestrator inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub trim: String,
    pub adjust_resolution: String,
    pub remove_audio: String,
    pub watermark: String,
    pub intro_outro: String,
    pub orchestrator: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            trim: Stage::Trim.default_queue().to_string(),
            adjust_resolution: Stage::AdjustResolution.default_queue().to_string(),
            remove_audio: Stage::RemoveAudio.default_queue().to_string(),
            watermark: Stage::Watermark.default_queue().to_string(),
            intro_outro: Stage::IntroOutro.default_queue().to_string(),
            orchestrator: "orchestrator_queue".to_string(),
        }
    }
}

impl QueueNames {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |key: &str, default: String| std::env::var(key).unwrap_or(default);

        Self {
            trim: var("TRIM_QUEUE", defaults.trim),
            adjust_resolution: var("EDIT_QUEUE", defaults.adjust_resolution),
            remove_audio: var("AUDIO_REMOVAL_QUEUE", defaults.remove_audio),
            watermark: var("WATERMARK_QUEUE", defaults.watermark),
            intro_outro: var("INTRO_OUTRO_QUEUE", defaults.intro_outro),
            orchestrator: var("ORCHESTRATOR_QUEUE", defaults.orchestrator),
        }
    }

    /// Queue that starts `stage`.
    pub fn for_stage(&self, stage: Stage) -> &str {
        match stage {
            Stage::Trim => &self.trim,
            Stage::AdjustResolution => &self.adjust_resolution,
            Stage::RemoveAudio => &self.remove_audio,
            Stage::Watermark => &self.watermark,
            Stage::IntroOutro => &self.intro_outro,
        }
    }

    /// Every queue, orchestrator queue last.
    pub fn all(&self) -> Vec<&str> {
        let mut queues: Vec<&str> = Stage::ALL.iter().map(|s| self.for_stage(*s)).collect();
        queues.push(&self.orchestrator);
        queues
    }
}

/// Consumer loop configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Unique consumer name inside the group
    pub consumer_name: String,
    /// Maximum deliveries handled concurrently
    pub max_concurrent: usize,
    /// How long a read blocks waiting for new entries
    pub block: Duration,
    /// Maximum entries fetched per read
    pub batch_size: usize,
    /// How often abandoned deliveries are reclaimed
    pub claim_interval: Duration,
    /// Idle time after which a pending delivery may be reclaimed
    pub claim_min_idle: Duration,
    /// Ownership refresh interval for in-flight deliveries
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for in-flight deliveries
    pub shutdown_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_name: format!("consumer-{}", Uuid::new_v4()),
            max_concurrent: 4,
            block: Duration::from_secs(1),
            batch_size: 5,
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(20),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl ConsumerConfig {
    /// Create config from environment variables.
    pub fn from_env(prefix: &str) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            consumer_name: format!("{}-{}", prefix, Uuid::new_v4()),
            max_concurrent: std::env::var("CONSUMER_MAX_CONCURRENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent),
            block: defaults.block,
            batch_size: defaults.batch_size,
            claim_interval: secs("CONSUMER_CLAIM_INTERVAL_SECS", defaults.claim_interval),
            claim_min_idle: secs("CONSUMER_CLAIM_MIN_IDLE_SECS", defaults.claim_min_idle),
            heartbeat_interval: secs("CONSUMER_HEARTBEAT_SECS", defaults.heartbeat_interval),
            shutdown_timeout: defaults.shutdown_timeout,
        }
    }
}

/// Consumer-side retry policy from `MAX_RETRIES` and `RETRY_DELAY_MINUTES`.
pub fn retry_policy_from_env(default_max_retries: u32) -> RetryPolicy {
    let max_retries = std::env::var("MAX_RETRIES")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default_max_retries);
    let delay_minutes: u64 = std::env::var("RETRY_DELAY_MINUTES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    RetryPolicy::new(max_retries, Duration::from_secs(delay_minutes * 60))
}
