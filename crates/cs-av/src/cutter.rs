//! Segment cutting, smart-cut re-encoding, and frame snapshots.
//!
//! Every cut copies all streams, normalizes negative timestamps, and moves
//! the container index to the front so HTTP playback can start early.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use cs_core::config::{ExportConfig, SeekMode};

use crate::tools::ToolConfig;
use crate::progress::ProgressTracker;

/// Callback receiving a completion fraction in `[0, 1]`.
pub type ProgressFn = dyn Fn(f64) + Send + Sync;

/// One `[start, end)` window of `input` written to `output`.
#[derive(Debug, Clone, PartialEq)]
pub struct CutJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub start: f64,
    pub end: f64,
}

impl CutJob {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Range and input sanity, checked before any tool runs.
    pub(crate) fn check(&self) -> cs_core::Result<()> {
        if !self.start.is_finite() || self.start < 0.0 {
            return Err(cs_core::Error::pipeline("cut", "start must be non-negative"));
        }
        if !self.end.is_finite() || self.end <= self.start {
            return Err(cs_core::Error::pipeline("cut", "end must be greater than start"));
        }
        if !self.input.is_file() {
            return Err(cs_core::Error::pipeline(
                "cut",
                format!("input not found: {}", self.input.display()),
            ));
        }
        Ok(())
    }
}

/// Encoder settings for the smart-cut fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub video_codec: String,
    pub crf: u32,
    pub preset: String,
    /// `copy` keeps the source audio untouched.
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

impl From<&ExportConfig> for EncodeSettings {
    fn from(cfg: &ExportConfig) -> Self {
        Self {
            video_codec: cfg.video_codec.clone(),
            crf: cfg.crf,
            preset: cfg.preset.clone(),
            audio_codec: cfg.audio_codec.clone(),
            audio_bitrate: cfg.audio_bitrate.clone(),
        }
    }
}

fn secs(v: f64) -> String {
    format!("{v:.6}")
}

const OUTPUT_FLAGS: [&str; 4] = ["-avoid_negative_ts", "make_zero", "-movflags", "+faststart"];

/// ffmpeg arguments for a stream-copy cut.
///
/// `Fast` seeks before opening the input (keyframe-snapped start);
/// `Accurate` seeks after opening it (exact start, slower).
pub fn cut_args(job: &CutJob, mode: SeekMode) -> Vec<String> {
    let input = job.input.to_string_lossy().to_string();
    let mut args: Vec<String> = vec!["-hide_banner".into()];
    match mode {
        SeekMode::Fast => {
            args.extend(["-ss".into(), secs(job.start), "-i".into(), input]);
        }
        SeekMode::Accurate => {
            args.extend(["-i".into(), input, "-ss".into(), secs(job.start)]);
        }
    }
    args.extend([
        "-t".into(),
        secs(job.duration()),
        "-map".into(),
        "0".into(),
        "-c".into(),
        "copy".into(),
    ]);
    args.extend(OUTPUT_FLAGS.iter().map(|s| s.to_string()));
    args.extend(["-y".into(), job.output.to_string_lossy().to_string()]);
    args
}

/// ffmpeg arguments for the re-encoding fallback. Non-video streams are
/// still copied unless an audio codec other than `copy` is configured.
pub fn smart_cut_args(job: &CutJob, encode: &EncodeSettings) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-ss".into(),
        secs(job.start),
        "-i".into(),
        job.input.to_string_lossy().to_string(),
        "-t".into(),
        secs(job.duration()),
        "-map".into(),
        "0".into(),
        "-c".into(),
        "copy".into(),
        "-c:v".into(),
        encode.video_codec.clone(),
        "-crf".into(),
        encode.crf.to_string(),
        "-preset".into(),
        encode.preset.clone(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-c:a".into(),
        encode.audio_codec.clone(),
    ];
    if encode.audio_codec != "copy" {
        args.extend(["-b:a".into(), encode.audio_bitrate.clone()]);
    }
    args.extend(OUTPUT_FLAGS.iter().map(|s| s.to_string()));
    args.extend(["-y".into(), job.output.to_string_lossy().to_string()]);
    args
}

/// ffmpeg arguments extracting one frame at `timestamp`.
pub fn snapshot_args(input: &Path, output: &Path, timestamp: f64, quality: u8) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-ss".into(),
        format!("{timestamp:.3}"),
        "-i".into(),
        input.to_string_lossy().to_string(),
        "-frames:v".into(),
        "1".into(),
        "-q:v".into(),
        quality.to_string(),
        "-y".into(),
        output.to_string_lossy().to_string(),
    ]
}

/// Run ffmpeg with `args`, reporting progress against `total_duration`.
pub(crate) async fn run_ffmpeg(
    ffmpeg: &ToolConfig,
    args: Vec<String>,
    total_duration: f64,
    on_progress: Option<&ProgressFn>,
    cancel: Option<&CancellationToken>,
) -> cs_core::Result<()> {
    let mut tracker = ProgressTracker::new(total_duration);
    ffmpeg
        .command()
        .args(args)
        .execute_streaming(
            |line| {
                if let (Some(cb), Some(fraction)) = (on_progress, tracker.observe(line)) {
                    cb(fraction);
                }
            },
            cancel,
        )
        .await?;
    Ok(())
}

/// Cut `job` by stream copy.
///
/// # Errors
///
/// [`cs_core::Error::Pipeline`] with step `cut` carrying the extracted
/// diagnostic line, or [`cs_core::Error::Cancelled`].
pub async fn cut_segment(
    ffmpeg: &ToolConfig,
    job: &CutJob,
    mode: SeekMode,
    on_progress: Option<&ProgressFn>,
    cancel: Option<&CancellationToken>,
) -> cs_core::Result<()> {
    job.check()?;
    tracing::debug!(
        input = %job.input.display(),
        output = %job.output.display(),
        start = job.start,
        end = job.end,
        ?mode,
        "Cutting segment"
    );
    run_ffmpeg(ffmpeg, cut_args(job, mode), job.duration(), on_progress, cancel)
        .await
        .map_err(|e| e.in_step("cut"))
}

/// Cut `job` by re-encoding video around the requested window.
pub async fn smart_cut(
    ffmpeg: &ToolConfig,
    job: &CutJob,
    encode: &EncodeSettings,
    on_progress: Option<&ProgressFn>,
    cancel: Option<&CancellationToken>,
) -> cs_core::Result<()> {
    job.check()?;
    tracing::info!(
        input = %job.input.display(),
        start = job.start,
        end = job.end,
        codec = %encode.video_codec,
        crf = encode.crf,
        "Smart cut (re-encode)"
    );
    run_ffmpeg(ffmpeg, smart_cut_args(job, encode), job.duration(), on_progress, cancel)
        .await
        .map_err(|e| e.in_step("smart_cut"))
}

/// Write one JPEG frame of `input` at `timestamp` to `output`.
pub async fn snapshot(
    ffmpeg: &ToolConfig,
    input: &Path,
    output: &Path,
    timestamp: f64,
    quality: u8,
    cancel: Option<&CancellationToken>,
) -> cs_core::Result<()> {
    if !timestamp.is_finite() || timestamp < 0.0 {
        return Err(cs_core::Error::Validation("timestamp must be non-negative".into()));
    }
    if !(1..=31).contains(&quality) {
        return Err(cs_core::Error::Validation("quality must be between 1 and 31".into()));
    }
    run_ffmpeg(ffmpeg, snapshot_args(input, output, timestamp, quality), 0.0, None, cancel)
        .await
        .map_err(|e| e.in_step("snapshot"))
}
