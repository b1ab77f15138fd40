//! Video record persistence.
//!
//! This crate provides:
//! - The `VideoRepository` seam used by the orchestrator and the stage workers
//! - A PostgreSQL implementation with embedded migrations
//! - An in-memory implementation for tests

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use config::DatabaseConfig;
pub use error::{RepositoryError, RepositoryResult};
pub use memory::MemoryVideoRepository;
pub use postgres::PgVideoRepository;
pub use repository::VideoRepository;
