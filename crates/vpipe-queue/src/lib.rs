//! Redis Streams broker adapter.
//!
//! This crate provides:
//! - Durable queue declaration with optional dead-letter stream
//! - Publish with bounded retry and a configurable failure policy
//! - Consumption with ack / requeue / defer / dead-letter settlement
//! - Reclaim of deliveries abandoned by crashed consumers
//! - The consumer loop shared by the orchestrator and every stage worker

pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod publisher;

pub use broker::{Broker, Delivery, QueueSpec};
pub use config::{
    retry_policy_from_env, BrokerConfig, ConsumerConfig, PublishFailurePolicy, QueueNames,
};
pub use consumer::{Consumer, Disposition, MessageHandler};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryPublisher;
pub use publisher::{publish_json, PublishOutcome, Publisher};
