//! Processing seam used by the stage workers.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// A stage transform: video bytes in, video bytes out.
#[async_trait]
pub trait VideoProcessingService: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn transform(&self, input: Vec<u8>) -> MediaResult<Vec<u8>>;
}

/// Run one FFmpeg command over `input` inside a scratch directory.
///
/// `build` receives the input and output paths. The directory is removed
/// when this returns.
pub(crate) async fn run_ffmpeg_on_bytes<F>(
    runner: &FfmpegRunner,
    input: Vec<u8>,
    build: F,
) -> MediaResult<Vec<u8>>
where
    F: FnOnce(&Path, &Path) -> FfmpegCommand,
{
    if input.is_empty() {
        return Err(MediaError::EmptyInput);
    }

    let temp_dir = tempfile::tempdir()?;
    let input_path = temp_dir.path().join("input.mp4");
    let output_path = temp_dir.path().join("output.mp4");

    tokio::fs::write(&input_path, &input).await?;
    debug!("Wrote {} input bytes to {}", input.len(), input_path.display());

    let cmd = build(&input_path, &output_path);
    runner.run(&cmd).await?;

    let output = tokio::fs::read(&output_path).await?;
    if output.is_empty() {
        return Err(MediaError::ffmpeg_failed("FFmpeg produced an empty file", None, Some(0)));
    }
    Ok(output)
}
