//! Object storage for the video pipeline.
//!
//! This crate provides:
//! - The `StorageRepository` seam used by the stage workers
//! - An S3-compatible client (R2, MinIO, AWS)
//! - An in-memory store for tests

pub mod client;
pub mod error;
pub mod memory;
pub mod repository;

pub use client::{S3Config, S3Storage};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;
pub use repository::StorageRepository;
