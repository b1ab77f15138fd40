//! Stage worker.
//!
//! This crate provides:
//! - The stage execution template shared by every stage
//! - The completion notifier that reports finished stages to the orchestrator
//! - The stage message handler applying the retry guards
//! - The worker binary; the stage is chosen by configuration

pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod notifier;
pub mod template;

pub use config::WorkerConfig;
pub use error::{StageError, StageResult};
pub use handler::StageHandler;
pub use logging::StageLogger;
pub use notifier::{NotificationService, QueueNotifier};
pub use template::{StageOutcome, StageWorker};
