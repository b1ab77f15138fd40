//! One transform per pipeline stage.
//!
//! Each transform exposes `command(input, output)` so the FFmpeg invocation
//! can be inspected without running it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::service::{run_ffmpeg_on_bytes, VideoProcessingService};

/// Cut the video to at most `max_seconds`, copying streams.
#[derive(Debug, Clone)]
pub struct Trim {
    pub max_seconds: u32,
    runner: FfmpegRunner,
}

impl Trim {
    pub fn new(max_seconds: u32, runner: FfmpegRunner) -> Self {
        Self { max_seconds, runner }
    }

    pub fn command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .duration(f64::from(self.max_seconds))
            .output_args(["-c", "copy"])
            .faststart()
    }
}

#[async_trait]
impl VideoProcessingService for Trim {
    fn name(&self) -> &'static str {
        "trim"
    }

    async fn transform(&self, input: Vec<u8>) -> MediaResult<Vec<u8>> {
        run_ffmpeg_on_bytes(&self.runner, input, |i, o| self.command(i, o)).await
    }
}

/// Fit the video into `width`x`height`, letterboxing to keep the aspect ratio.
#[derive(Debug, Clone)]
pub struct AdjustResolution {
    pub width: u32,
    pub height: u32,
    runner: FfmpegRunner,
}

impl AdjustResolution {
    pub fn new(width: u32, height: u32, runner: FfmpegRunner) -> Self {
        Self {
            width,
            height,
            runner,
        }
    }

    pub fn command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .video_filter(scale_and_pad(self.width, self.height))
            .video_codec("libx264")
            .preset("veryfast")
            .crf(23)
            .audio_codec("copy")
            .faststart()
    }
}

#[async_trait]
impl VideoProcessingService for AdjustResolution {
    fn name(&self) -> &'static str {
        "adjust_resolution"
    }

    async fn transform(&self, input: Vec<u8>) -> MediaResult<Vec<u8>> {
        run_ffmpeg_on_bytes(&self.runner, input, |i, o| self.command(i, o)).await
    }
}

/// Strip every audio track.
#[derive(Debug, Clone, Default)]
pub struct RemoveAudio {
    runner: FfmpegRunner,
}

impl RemoveAudio {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self { runner }
    }

    pub fn command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .no_audio()
            .video_codec("copy")
            .faststart()
    }
}

#[async_trait]
impl VideoProcessingService for RemoveAudio {
    fn name(&self) -> &'static str {
        "remove_audio"
    }

    async fn transform(&self, input: Vec<u8>) -> MediaResult<Vec<u8>> {
        run_ffmpeg_on_bytes(&self.runner, input, |i, o| self.command(i, o)).await
    }
}

/// Overlay an image in the bottom-right corner.
#[derive(Debug, Clone)]
pub struct Watermark {
    pub image_path: PathBuf,
    /// Distance from the right and bottom edges, in pixels
    pub margin: u32,
    runner: FfmpegRunner,
}

impl Watermark {
    pub fn new(image_path: impl Into<PathBuf>, runner: FfmpegRunner) -> Self {
        Self {
            image_path: image_path.into(),
            margin: 10,
            runner,
        }
    }

    pub fn command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .add_input(&self.image_path)
            .filter_complex(format!(
                "[0:v][1:v]overlay=W-w-{m}:H-h-{m}:format=auto[out]",
                m = self.margin
            ))
            .map("[out]")
            .map("0:a?")
            .video_codec("libx264")
            .preset("veryfast")
            .crf(23)
            .audio_codec("copy")
            .faststart()
    }
}

#[async_trait]
impl VideoProcessingService for Watermark {
    fn name(&self) -> &'static str {
        "watermark"
    }

    async fn transform(&self, input: Vec<u8>) -> MediaResult<Vec<u8>> {
        ensure_asset(&self.image_path)?;
        run_ffmpeg_on_bytes(&self.runner, input, |i, o| self.command(i, o)).await
    }
}

/// Concatenate intro + video + outro, normalised to `width`x`height`.
///
/// The pipeline removes audio before this stage, so only video is joined.
#[derive(Debug, Clone)]
pub struct IntroOutro {
    pub intro_path: PathBuf,
    pub outro_path: PathBuf,
    pub width: u32,
    pub height: u32,
    runner: FfmpegRunner,
}

impl IntroOutro {
    pub fn new(
        intro_path: impl Into<PathBuf>,
        outro_path: impl Into<PathBuf>,
        width: u32,
        height: u32,
        runner: FfmpegRunner,
    ) -> Self {
        Self {
            intro_path: intro_path.into(),
            outro_path: outro_path.into(),
            width,
            height,
            runner,
        }
    }

    pub fn command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        let normalise = format!(
            "{},setsar=1,fps=30,format=yuv420p",
            scale_and_pad(self.width, self.height)
        );
        let filter = format!(
            "[0:v]{n}[intro];[1:v]{n}[main];[2:v]{n}[outro];\
             [intro][main][outro]concat=n=3:v=1:a=0[out]",
            n = normalise
        );

        FfmpegCommand::new(&self.intro_path, output)
            .add_input(input)
            .add_input(&self.outro_path)
            .filter_complex(filter)
            .map("[out]")
            .video_codec("libx264")
            .preset("veryfast")
            .crf(23)
            .no_audio()
            .faststart()
    }
}

#[async_trait]
impl VideoProcessingService for IntroOutro {
    fn name(&self) -> &'static str {
        "intro_outro"
    }

    async fn transform(&self, input: Vec<u8>) -> MediaResult<Vec<u8>> {
        ensure_asset(&self.intro_path)?;
        ensure_asset(&self.outro_path)?;
        run_ffmpeg_on_bytes(&self.runner, input, |i, o| self.command(i, o)).await
    }
}

fn scale_and_pad(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
        w = width,
        h = height
    )
}

fn ensure_asset(path: &Path) -> MediaResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(MediaError::AssetNotFound(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> (PathBuf, PathBuf) {
        (PathBuf::from("/work/input.mp4"), PathBuf::from("/work/output.mp4"))
    }

    fn arg_after(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    }

    #[test]
    fn test_trim_copies_streams() {
        let (i, o) = paths();
        let args = Trim::new(30, FfmpegRunner::new()).command(&i, &o).build_args();
        assert_eq!(arg_after(&args, "-t").as_deref(), Some("30.000"));
        assert_eq!(arg_after(&args, "-c").as_deref(), Some("copy"));
        assert_eq!(args.last().map(String::as_str), Some("/work/output.mp4"));
    }

    #[test]
    fn test_adjust_resolution_scales_and_pads() {
        let (i, o) = paths();
        let args = AdjustResolution::new(1280, 720, FfmpegRunner::new())
            .command(&i, &o)
            .build_args();
        let vf = arg_after(&args, "-vf").unwrap();
        assert!(vf.starts_with("scale=1280:720:force_original_aspect_ratio=decrease"));
        assert!(vf.contains("pad=1280:720"));
        assert_eq!(arg_after(&args, "-c:v").as_deref(), Some("libx264"));
    }

    #[test]
    fn test_remove_audio_drops_audio() {
        let (i, o) = paths();
        let args = RemoveAudio::default().command(&i, &o).build_args();
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(arg_after(&args, "-c:v").as_deref(), Some("copy"));
    }

    #[test]
    fn test_watermark_overlays_second_input() {
        let (i, o) = paths();
        let args = Watermark::new("/assets/logo.png", FfmpegRunner::new())
            .command(&i, &o)
            .build_args();
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        let filter = arg_after(&args, "-filter_complex").unwrap();
        assert!(filter.contains("overlay=W-w-10:H-h-10"));
        assert_eq!(arg_after(&args, "-map").as_deref(), Some("[out]"));
    }

    #[test]
    fn test_intro_outro_concatenates_three_inputs_in_order() {
        let (i, o) = paths();
        let intro_outro = IntroOutro::new(
            "/assets/intro.mp4",
            "/assets/outro.mp4",
            1280,
            720,
            FfmpegRunner::new(),
        );
        let args = intro_outro.command(&i, &o).build_args();

        let inputs: Vec<&String> = args
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx > 0 && args[idx - 1] == "-i")
            .map(|(_, a)| a)
            .collect();
        assert_eq!(inputs, vec!["/assets/intro.mp4", "/work/input.mp4", "/assets/outro.mp4"]);

        let filter = arg_after(&args, "-filter_complex").unwrap();
        assert!(filter.contains("concat=n=3:v=1:a=0"));
    }

    #[tokio::test]
    async fn test_missing_asset_fails_before_ffmpeg() {
        let watermark = Watermark::new("/definitely/not/here.png", FfmpegRunner::new());
        let err = watermark.transform(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, MediaError::AssetNotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected() {
        let err = RemoveAudio::default().transform(Vec::new()).await.unwrap_err();
        assert!(matches!(err, MediaError::EmptyInput));
    }
}
