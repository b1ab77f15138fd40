//! Transform parameters and the stage-to-transform factory.

use std::path::PathBuf;
use std::sync::Arc;

use vpipe_models::Stage;

use crate::command::FfmpegRunner;
use crate::service::VideoProcessingService;
use crate::transforms::{AdjustResolution, IntroOutro, RemoveAudio, Trim, Watermark};

#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Longest clip kept by the trim stage
    pub trim_max_seconds: u32,
    /// Output frame size for resolution and intro/outro stages
    pub target_width: u32,
    pub target_height: u32,
    pub watermark_path: PathBuf,
    pub intro_path: PathBuf,
    pub outro_path: PathBuf,
    /// Kill FFmpeg after this many seconds; unset means no limit
    pub ffmpeg_timeout_secs: Option<u64>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            trim_max_seconds: 30,
            target_width: 1280,
            target_height: 720,
            watermark_path: PathBuf::from("assets/watermark.png"),
            intro_path: PathBuf::from("assets/intro.mp4"),
            outro_path: PathBuf::from("assets/outro.mp4"),
            ffmpeg_timeout_secs: None,
        }
    }
}

impl MediaConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let num = |key: &str, default: u32| {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(default)
        };
        let path = |key: &str, default: PathBuf| {
            std::env::var(key).map(PathBuf::from).unwrap_or(default)
        };

        Self {
            trim_max_seconds: num("TRIM_MAX_SECONDS", defaults.trim_max_seconds),
            target_width: num("TARGET_WIDTH", defaults.target_width),
            target_height: num("TARGET_HEIGHT", defaults.target_height),
            watermark_path: path("WATERMARK_PATH", defaults.watermark_path),
            intro_path: path("INTRO_PATH", defaults.intro_path),
            outro_path: path("OUTRO_PATH", defaults.outro_path),
            ffmpeg_timeout_secs: std::env::var("FFMPEG_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    pub fn runner(&self) -> FfmpegRunner {
        match self.ffmpeg_timeout_secs {
            Some(secs) => FfmpegRunner::new().with_timeout(secs),
            None => FfmpegRunner::new(),
        }
    }
}

/// The transform a worker for `stage` runs.
pub fn service_for_stage(stage: Stage, config: &MediaConfig) -> Arc<dyn VideoProcessingService> {
    let runner = config.runner();
    match stage {
        Stage::Trim => Arc::new(Trim::new(config.trim_max_seconds, runner)),
        Stage::AdjustResolution => Arc::new(AdjustResolution::new(
            config.target_width,
            config.target_height,
            runner,
        )),
        Stage::RemoveAudio => Arc::new(RemoveAudio::new(runner)),
        Stage::Watermark => Arc::new(Watermark::new(config.watermark_path.clone(), runner)),
        Stage::IntroOutro => Arc::new(IntroOutro::new(
            config.intro_path.clone(),
            config.outro_path.clone(),
            config.target_width,
            config.target_height,
            runner,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_covers_every_stage() {
        let config = MediaConfig::default();
        for stage in Stage::ALL {
            assert_eq!(service_for_stage(stage, &config).name(), stage.as_str());
        }
    }
}
