//! # cs-av
//!
//! External media tooling for cutsmith.
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- locate ffmpeg, ffprobe, yt-dlp.
//! - **Process runner** ([`ToolCommand`]) -- async builder with timeout,
//!   line streaming, and cancellation.
//! - **Progress parsing** ([`progress`]) -- pure extraction of completion
//!   fractions and error lines from diagnostic text.
//! - **Cutting** ([`cutter`], [`keyframes`], [`concat`]) -- stream-copy cuts,
//!   keyframe alignment checks, smart-cut fallback, concat demuxer merges.
//! - **Probing** ([`probe`]) and **downloads** ([`ytdlp`]).
//! - **Seam** ([`Transcode`]) -- what the server depends on.

pub mod command;
pub mod concat;
pub mod cutter;
pub mod keyframes;
pub mod probe;
pub mod progress;
pub mod tools;
pub mod transcoder;
pub mod ytdlp;

// ---- Re-exports for convenience ----

pub use command::{StreamSource, ToolCommand, ToolOutput};
pub use cutter::{CutJob, EncodeSettings, ProgressFn};
pub use probe::ProbeSummary;
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use transcoder::{CutSettings, FfmpegTranscoder, Transcode};
