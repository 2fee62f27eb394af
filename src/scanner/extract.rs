//! Still-frame extraction from video files.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;
use wait_timeout::ChildExt;

use crate::config::ThumbnailConfig;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("extractor exited with {status}: {message}")]
    Failed { status: String, message: String },

    #[error("extractor produced no output at {0}")]
    MissingOutput(PathBuf),

    #[error("I/O error while extracting: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes one still frame of `video` to `destination`.
///
/// Implementations must either leave a complete image at `destination`
/// and return `Ok`, or return an error.
pub trait FrameExtractor: Send + Sync {
    fn extract(&self, video: &Path, destination: &Path) -> Result<(), ExtractError>;
}

/// Frame extraction through an external `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    program: PathBuf,
    offset_secs: f64,
    width: u32,
    height: u32,
    timeout: Duration,
}

impl FfmpegExtractor {
    pub fn new(config: &ThumbnailConfig) -> Self {
        Self {
            program: config.ffmpeg.clone(),
            offset_secs: config.offset_secs.max(0.0),
            width: config.width.max(1),
            height: config.height.max(1),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    fn args(&self, video: &Path, destination: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = [
            "-nostdin",
            "-hide_banner",
            "-loglevel",
            "error",
            "-ss",
        ]
        .iter()
        .map(Into::into)
        .collect();
        args.push(format!("{:.3}", self.offset_secs).into());
        args.push("-i".into());
        args.push(video.into());
        args.push("-frames:v".into());
        args.push("1".into());
        args.push("-vf".into());
        args.push(
            format!(
                "scale={}:{}:force_original_aspect_ratio=decrease",
                self.width, self.height
            )
            .into(),
        );
        args.push("-y".into());
        args.push(destination.into());
        args
    }
}

impl FrameExtractor for FfmpegExtractor {
    fn extract(&self, video: &Path, destination: &Path) -> Result<(), ExtractError> {
        let mut child = Command::new(&self.program)
            .args(self.args(video, destination))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExtractError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                child.kill().ok();
                child.wait().ok();
                return Err(ExtractError::Timeout(self.timeout));
            }
        };

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                err.read_to_string(&mut stderr).ok();
            }
            return Err(ExtractError::Failed {
                status: status.to_string(),
                message: stderr.lines().last().unwrap_or("unknown").to_string(),
            });
        }

        match std::fs::metadata(destination) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(ExtractError::MissingOutput(destination.to_path_buf())),
        }
    }
}
