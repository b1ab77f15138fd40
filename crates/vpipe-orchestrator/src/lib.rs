//! Pipeline orchestrator.
//!
//! This crate provides:
//! - The table-driven orchestrator that moves a video from stage to stage
//! - The retry governor that fronts it on the orchestrator queue
//! - The orchestrator binary

pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod orchestrator;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, OrchestratorResult, Step};
pub use handler::{GovernorError, OrchestratorHandler};
pub use orchestrator::Orchestrator;
