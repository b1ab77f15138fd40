//! FFmpeg-backed stage transforms.
//!
//! This crate provides:
//! - An FFmpeg command builder and runner
//! - The `VideoProcessingService` seam (bytes in, bytes out)
//! - One transform per pipeline stage
//! - A factory that picks the transform for a stage from configuration

pub mod command;
pub mod config;
pub mod error;
pub mod service;
pub mod transforms;

pub use command::{FfmpegCommand, FfmpegRunner};
pub use config::{service_for_stage, MediaConfig};
pub use error::{MediaError, MediaResult};
pub use service::VideoProcessingService;
pub use transforms::{AdjustResolution, IntroOutro, RemoveAudio, Trim, Watermark};
