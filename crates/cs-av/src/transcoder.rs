//! The media-tool seam used by the export orchestrator.
//!
//! [`Transcode`] abstracts cutting, merging, probing, and snapshots so the
//! orchestrator can be exercised without ffmpeg. [`FfmpegTranscoder`] is the
//! production implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cs_core::config::{ExportConfig, SeekMode};

use crate::cutter::{self, CutJob, EncodeSettings, ProgressFn};
use crate::probe::{self, ProbeSummary};
use crate::tools::{ToolConfig, ToolRegistry};
use crate::{concat, keyframes};

/// Media operations the server depends on.
#[async_trait]
pub trait Transcode: Send + Sync {
    /// Cut one window. Chooses stream copy or re-encode internally.
    async fn cut(
        &self,
        job: &CutJob,
        on_progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> cs_core::Result<()>;

    /// Join fragments in order without re-encoding.
    async fn merge(
        &self,
        fragments: &[PathBuf],
        output: &Path,
        list_dir: &Path,
        total_duration: f64,
        on_progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> cs_core::Result<()>;

    /// Advisory: can `[start, end)` be cut by pure stream copy?
    /// Implementations must answer `false` when they cannot tell.
    async fn can_cut_losslessly(&self, input: &Path, start: f64, end: f64) -> bool;

    async fn probe(&self, file: &Path) -> cs_core::Result<ProbeSummary>;

    async fn snapshot(
        &self,
        input: &Path,
        output: &Path,
        timestamp: f64,
        quality: u8,
    ) -> cs_core::Result<()>;
}

/// Cut strategy knobs taken from [`ExportConfig`].
#[derive(Debug, Clone)]
pub struct CutSettings {
    pub seek_mode: SeekMode,
    pub smart_cut: bool,
    pub keyframe_tolerance: f64,
    pub encode: EncodeSettings,
}

impl From<&ExportConfig> for CutSettings {
    fn from(cfg: &ExportConfig) -> Self {
        Self {
            seek_mode: cfg.seek_mode,
            smart_cut: cfg.smart_cut,
            keyframe_tolerance: cfg.keyframe_tolerance_secs,
            encode: EncodeSettings::from(cfg),
        }
    }
}

/// [`Transcode`] backed by the ffmpeg/ffprobe binaries in a [`ToolRegistry`].
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    tools: Arc<ToolRegistry>,
    settings: CutSettings,
}

impl FfmpegTranscoder {
    pub fn new(tools: Arc<ToolRegistry>, settings: CutSettings) -> Self {
        Self { tools, settings }
    }

    fn ffmpeg(&self) -> cs_core::Result<&ToolConfig> {
        self.tools.require("ffmpeg")
    }

    fn ffprobe(&self) -> cs_core::Result<&ToolConfig> {
        self.tools.require("ffprobe")
    }
}

#[async_trait]
impl Transcode for FfmpegTranscoder {
    async fn cut(
        &self,
        job: &CutJob,
        on_progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> cs_core::Result<()> {
        job.check()?;
        let ffmpeg = self.ffmpeg().map_err(|e| e.in_step("cut"))?;

        if self.settings.smart_cut && !self.can_cut_losslessly(&job.input, job.start, job.end).await {
            return cutter::smart_cut(ffmpeg, job, &self.settings.encode, on_progress, Some(cancel))
                .await;
        }

        cutter::cut_segment(ffmpeg, job, self.settings.seek_mode, on_progress, Some(cancel)).await
    }

    async fn merge(
        &self,
        fragments: &[PathBuf],
        output: &Path,
        list_dir: &Path,
        total_duration: f64,
        on_progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> cs_core::Result<()> {
        if fragments.is_empty() {
            return Err(cs_core::Error::pipeline("merge", "no fragments to merge"));
        }
        let ffmpeg = self.ffmpeg().map_err(|e| e.in_step("merge"))?;
        concat::merge_fragments(
            ffmpeg,
            fragments,
            output,
            list_dir,
            total_duration,
            on_progress,
            Some(cancel),
        )
        .await
    }

    async fn can_cut_losslessly(&self, input: &Path, start: f64, end: f64) -> bool {
        let Ok(ffprobe) = self.ffprobe() else {
            tracing::warn!("ffprobe unavailable; keyframe check reports not lossless");
            return false;
        };
        keyframes::can_cut_losslessly(ffprobe, input, start, end, self.settings.keyframe_tolerance)
            .await
    }

    async fn probe(&self, file: &Path) -> cs_core::Result<ProbeSummary> {
        let ffprobe = self.ffprobe()?;
        probe::probe_file(ffprobe, file).await
    }

    async fn snapshot(
        &self,
        input: &Path,
        output: &Path,
        timestamp: f64,
        quality: u8,
    ) -> cs_core::Result<()> {
        let ffmpeg = self.ffmpeg()?;
        cutter::snapshot(ffmpeg, input, output, timestamp, quality, None).await
    }
}
