//! Orchestrator configuration.

use std::net::SocketAddr;

use vpipe_models::RetryPolicy;
use vpipe_queue::{retry_policy_from_env, BrokerConfig, ConsumerConfig, QueueNames};

/// Default attempt budget for messages on the orchestrator queue.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub broker: BrokerConfig,
    pub queues: QueueNames,
    pub consumer: ConsumerConfig,
    /// Guards applied to inbound messages
    pub retry: RetryPolicy,
    /// Prometheus listener, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            queues: QueueNames::default(),
            consumer: ConsumerConfig::default(),
            retry: RetryPolicy::new(DEFAULT_MAX_RETRIES, RetryPolicy::default().retry_delay),
            metrics_addr: None,
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            broker: BrokerConfig::from_env(),
            queues: QueueNames::from_env(),
            consumer: ConsumerConfig::from_env("orchestrator"),
            retry: retry_policy_from_env(DEFAULT_MAX_RETRIES),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}
