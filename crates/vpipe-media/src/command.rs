//! Building and running `ffmpeg` invocations.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Stderr kept for error reports.
const STDERR_TAIL_BYTES: usize = 2048;

/// One `-i` input with the arguments that precede it.
#[derive(Debug, Clone)]
struct Input {
    args: Vec<String>,
    path: PathBuf,
}

/// One `ffmpeg` invocation: inputs in order, then output options, then the
/// output path.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<Input>,
    output: PathBuf,
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    /// Command reading `input` and writing `output`, overwriting it.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![Input {
                args: Vec::new(),
                path: input.as_ref().to_path_buf(),
            }],
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add another input, addressed as `[n:v]` in filters.
    pub fn add_input(mut self, input: impl AsRef<Path>) -> Self {
        self.inputs.push(Input {
            args: Vec::new(),
            path: input.as_ref().to_path_buf(),
        });
        self
    }

    /// Add an argument before the most recently added input.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        if let Some(input) = self.inputs.last_mut() {
            input.args.push(arg.into());
        }
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.output_arg(arg))
    }

    fn option(self, flag: &str, value: impl Into<String>) -> Self {
        self.output_arg(flag).output_arg(value)
    }

    /// Stop writing after `seconds`.
    pub fn duration(self, seconds: f64) -> Self {
        self.option("-t", format!("{:.3}", seconds))
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.option("-vf", filter)
    }

    pub fn filter_complex(self, graph: impl Into<String>) -> Self {
        self.option("-filter_complex", graph)
    }

    /// Select a stream or filter label for the output.
    pub fn map(self, stream: impl Into<String>) -> Self {
        self.option("-map", stream)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.option("-c:v", codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.option("-c:a", codec)
    }

    /// Drop every audio stream.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Constant rate factor; lower is better quality.
    pub fn crf(self, value: u8) -> Self {
        self.option("-crf", value.to_string())
    }

    pub fn preset(self, name: impl Into<String>) -> Self {
        self.option("-preset", name)
    }

    /// Move the index to the front so the file streams.
    pub fn faststart(self) -> Self {
        self.option("-movflags", "+faststart")
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Full argument list, without the program name.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::with_capacity(4 + self.output_args.len());
        if self.overwrite {
            args.push("-y".into());
        }
        args.extend(["-v".into(), self.log_level.clone()]);

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.extend(["-i".into(), input.path.display().to_string()]);
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.display().to_string());
        args
    }
}

/// Runner for FFmpeg commands with an optional timeout.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill FFmpeg after `secs` seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(Duration::from_secs(secs));
        self
    }

    /// Run `cmd` to completion, capturing stderr for error reports.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let program = which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!(program = %program.display(), "ffmpeg {}", args.join(" "));

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("stderr not captured", None, None))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let status = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!("FFmpeg timed out after {} seconds, killing process", timeout.as_secs());
                    child.kill().await.ok();
                    return Err(MediaError::Timeout(timeout.as_secs()));
                }
            },
            None => child.wait().await?,
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(MediaError::ffmpeg_failed(
                format!("ffmpeg exited with {}", status),
                Some(stderr_tail(&stderr)),
                status.code(),
            ));
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
