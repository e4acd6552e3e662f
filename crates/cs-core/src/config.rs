//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! server, storage, tool, export, job, streaming, and download sections.
//! Every section defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    pub export: ExportConfig,
    pub jobs: JobsConfig,
    pub streaming: StreamingConfig,
    pub download: DownloadConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.jobs.max_concurrent == 0 {
            warnings.push("jobs.max_concurrent is 0; it will be treated as 1".into());
        }

        if self.tools.timeout_secs == 0 {
            warnings.push("tools.timeout_secs is 0; tools will be killed after 1s".into());
        }

        if !(0..=51).contains(&self.export.crf) {
            warnings.push(format!(
                "export.crf {} is outside the encoder range 0-51",
                self.export.crf
            ));
        }

        if self.export.keyframe_tolerance_secs <= 0.0 {
            warnings.push(
                "export.keyframe_tolerance_secs must be positive; every cut will re-encode".into(),
            );
        }

        if self.export.missing_end_secs <= 0.0 {
            warnings.push("export.missing_end_secs must be positive".into());
        }

        if self.streaming.read_buffer_bytes == 0 {
            warnings.push("streaming.read_buffer_bytes is 0; 64 KiB will be used".into());
        }

        if self.streaming.max_chunk_bytes == 0 {
            warnings.push("streaming.max_chunk_bytes is 0; open ranges will be empty".into());
        }

        let valid_formats = ["mp4", "mkv", "mov", "webm", "ts", "m4a", "mp3"];
        if !valid_formats.contains(&self.export.default_format.as_str()) {
            warnings.push(format!(
                "export.default_format '{}' is not a recognized container (valid: {})",
                self.export.default_format,
                valid_formats.join(", ")
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: u64,
    pub cors_origins: Vec<String>,
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_upload_bytes: 10 * 1024 * 1024 * 1024,
            cors_origins: vec!["*".into()],
            static_dir: None,
        }
    }
}

/// Where records and media bytes live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_path: PathBuf,
    /// Temp entries older than this are swept at start-up.
    pub cleanup_after_days: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./data"),
            cleanup_after_days: 7,
        }
    }
}

impl StorageConfig {
    /// The base path with a leading `~` and `$VARS` expanded.
    pub fn resolved_base_path(&self) -> PathBuf {
        let raw = self.base_path.to_string_lossy();
        match shellexpand::full(&raw) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(_) => self.base_path.clone(),
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    /// Longest any single tool run may take before it is killed.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            ytdlp_path: None,
            timeout_secs: 6 * 60 * 60,
        }
    }
}

/// How segment cuts seek into the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekMode {
    /// Seek before opening the input; keyframe-snapped start.
    #[default]
    Fast,
    /// Seek after opening the input; exact start.
    Accurate,
}

/// Export defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub default_format: String,
    pub seek_mode: SeekMode,
    /// Re-encode around non-keyframe boundaries instead of snapping.
    pub smart_cut: bool,
    pub video_codec: String,
    pub crf: u32,
    pub preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Effective segment length when a segment has no end.
    pub missing_end_secs: f64,
    pub keyframe_tolerance_secs: f64,
    /// Write outputs to a staging directory and publish only on success.
    pub stage_outputs: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_format: "mp4".into(),
            seek_mode: SeekMode::Fast,
            smart_cut: false,
            video_codec: "libx264".into(),
            crf: 18,
            preset: "fast".into(),
            audio_codec: "copy".into(),
            audio_bitrate: "192k".into(),
            missing_end_secs: 60.0,
            keyframe_tolerance_secs: 0.1,
            stage_outputs: true,
        }
    }
}

/// Background worker pool limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub max_concurrent: usize,
    pub max_queued: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_queued: 16,
        }
    }
}

/// Range streaming limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Cap applied to open-ended `bytes=A-` requests.
    pub max_chunk_bytes: u64,
    pub read_buffer_bytes: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: 10 * 1024 * 1024,
            read_buffer_bytes: 64 * 1024,
        }
    }
}

/// URL download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// yt-dlp format selector.
    pub format: String,
    pub progress_interval_ms: u64,
    pub http_timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            format: "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".into(),
            progress_interval_ms: 500,
            http_timeout_secs: 30 * 60,
        }
    }
}
