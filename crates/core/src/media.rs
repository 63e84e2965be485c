//! Ports to the external media tools and their ffprobe/ffmpeg adapters.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{ExhibitError, Result};

pub const FADE_IN_SECS: f64 = 0.3;
pub const FADE_OUT_SECS: f64 = 0.5;
pub const LOUDNORM_TARGET: &str = "I=-16:TP=-1.5:LRA=11";
pub const CLIP_EXTENSION: &str = "mp4";

/// Characters of transcoder stderr kept for the process log.
pub const STDERR_TAIL_CHARS: usize = 200;

#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Duration of the media file in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64>;
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Cut `request.duration` seconds starting at `request.start` into
    /// `request.output`.
    async fn transcode(&self, request: &TranscodeRequest) -> Result<PathBuf>;
}

/// Video and audio filter chains applied to every clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipFilters {
    pub video: String,
    pub audio: String,
}

impl ClipFilters {
    /// Fade in from black, fade out ending exactly at `duration`, and
    /// loudness-normalized audio with matching fades.
    pub fn for_duration(duration: f64) -> Self {
        let fade_out_start = (duration - FADE_OUT_SECS).max(0.0);
        Self {
            video: format!(
                "fade=t=in:st=0:d={FADE_IN_SECS},fade=t=out:st={fade_out_start:.3}:d={FADE_OUT_SECS}"
            ),
            audio: format!(
                "loudnorm={LOUDNORM_TARGET},afade=t=in:ss=0:d={FADE_IN_SECS},afade=t=out:st={fade_out_start:.3}:d={FADE_OUT_SECS}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub start: f64,
    pub duration: f64,
    pub filters: ClipFilters,
}

impl TranscodeRequest {
    pub fn new(input: &Path, output: &Path, start: f64, duration: f64) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            start,
            duration,
            filters: ClipFilters::for_duration(duration),
        }
    }

    /// ffmpeg arguments. Seek and duration go before `-i` so the cut is taken
    /// from the source at `start` for exactly `duration` seconds.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-y".into(),
            "-ss".into(),
            format!("{:.3}", self.start),
            "-t".into(),
            format!("{:.3}", self.duration),
            "-i".into(),
            self.input.to_string_lossy().into_owned(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "0:a:0".into(),
            "-filter:v".into(),
            self.filters.video.clone(),
            "-filter:a".into(),
            self.filters.audio.clone(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "fast".into(),
            "-crf".into(),
            "22".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "192k".into(),
            self.output.to_string_lossy().into_owned(),
        ]
    }
}

/// Last `max_chars` characters of `text`.
pub fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    let offset = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[offset..]
}

/// Duration probe backed by `ffprobe`.
#[derive(Debug, Clone, Default)]
pub struct Ffprobe;

#[async_trait]
impl MediaProbe for Ffprobe {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(ExhibitError::ProbeFailed {
                path: path.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<f64>()
            .map_err(|e| ExhibitError::ProbeFailed {
                path: path.to_path_buf(),
                reason: format!("unreadable duration {:?}: {}", stdout.trim(), e),
            })
    }
}

/// Transcoder backed by `ffmpeg`.
#[derive(Debug, Clone, Default)]
pub struct Ffmpeg;

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<PathBuf> {
        let output = Command::new("ffmpeg")
            .args(request.ffmpeg_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExhibitError::TranscodeFailed {
                output: request.output.clone(),
                stderr_tail: tail(&stderr, STDERR_TAIL_CHARS).to_string(),
            });
        }

        Ok(request.output.clone())
    }
}

/// Probe adapter that maps any failure to `0.0`, the "unusable" duration.
pub async fn duration_or_zero<P: MediaProbe + ?Sized>(probe: &P, path: &Path) -> f64 {
    match probe.probe_duration(path).await {
        Ok(duration) if duration.is_finite() && duration > 0.0 => duration,
        Ok(_) => 0.0,
        Err(e) => {
            tracing::warn!("Error getting duration for {}: {}", path.display(), e);
            0.0
        }
    }
}
