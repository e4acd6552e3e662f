//! Domain records: media files, projects and their segments, export
//! operations, and URL downloads.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::ids::{DownloadId, OperationId, ProjectId, SegmentId, VideoId};

// ---------------------------------------------------------------------------
// MediaFile
// ---------------------------------------------------------------------------

/// Kind of elementary stream inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Data,
}

impl StreamKind {
    /// Map an ffprobe `codec_type` string.
    pub fn from_codec_type(s: &str) -> Self {
        match s {
            "video" => StreamKind::Video,
            "audio" => StreamKind::Audio,
            "subtitle" => StreamKind::Subtitle,
            _ => StreamKind::Data,
        }
    }
}

/// One stream descriptor of a probed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StreamInfo {
    pub index: u32,
    pub kind: StreamKind,
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Chapter marker embedded in a source container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ChapterInfo {
    pub start: f64,
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// An ingested media file. Immutable once probed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MediaFile {
    pub id: VideoId,
    pub file_name: String,
    #[schema(value_type = String)]
    pub path: PathBuf,
    pub size: u64,
    /// Duration in seconds; zero when probing failed.
    pub duration: f64,
    pub container: String,
    #[serde(default)]
    pub streams: Vec<StreamInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chapters: Vec<ChapterInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MediaFile {
    /// The first video stream, if any.
    pub fn primary_video(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind == StreamKind::Video)
    }

    pub fn has_video(&self) -> bool {
        self.primary_video().is_some()
    }
}

// ---------------------------------------------------------------------------
// Project & Segment
// ---------------------------------------------------------------------------

/// A user-defined time range inside a project's media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Segment {
    pub id: SegmentId,
    #[serde(default)]
    pub name: String,
    /// Inclusive start in seconds.
    pub start: f64,
    /// Exclusive end in seconds; `None` means "to end of media".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default)]
    pub selected: bool,
}

impl Segment {
    pub fn new(name: impl Into<String>, start: f64, end: Option<f64>) -> Self {
        Self {
            id: SegmentId::new(),
            name: name.into(),
            start,
            end,
            tags: BTreeMap::new(),
            color: None,
            selected: false,
        }
    }

    /// The end used for export: the explicit end, or `start + fallback`
    /// when the user never set one.
    pub fn effective_end(&self, fallback_secs: f64) -> f64 {
        self.end.unwrap_or(self.start + fallback_secs)
    }

    /// Length of the effective range in seconds.
    pub fn effective_duration(&self, fallback_secs: f64) -> f64 {
        self.effective_end(fallback_secs) - self.start
    }

    /// Check `start >= 0` and `end > start`.
    pub fn validate(&self) -> Result<()> {
        if !self.start.is_finite() || self.start < 0.0 {
            return Err(Error::Validation(format!(
                "segment {}: start must be a non-negative number",
                self.id
            )));
        }
        if let Some(end) = self.end {
            if !end.is_finite() || end <= self.start {
                return Err(Error::Validation(format!(
                    "segment {}: end must be greater than start",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// An editing project: one media file plus an ordered segment list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub video_id: VideoId,
    /// User order. Export preserves this order.
    #[serde(default)]
    pub segments: Vec<Segment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, video_id: VideoId) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            name: name.into(),
            video_id,
            segments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    /// Resolve the segments an export should cover.
    ///
    /// An empty `ids` slice selects every segment. Otherwise the project's
    /// segments are filtered to the named subset in project order; the order
    /// of `ids` is irrelevant and unknown ids are ignored.
    pub fn resolve_segments(&self, ids: &[SegmentId]) -> Vec<Segment> {
        if ids.is_empty() {
            return self.segments.clone();
        }
        self.segments
            .iter()
            .filter(|s| ids.contains(&s.id))
            .cloned()
            .collect()
    }

    /// Validate every segment and reject duplicate ids.
    pub fn validate_segments(&self) -> Result<()> {
        for (i, seg) in self.segments.iter().enumerate() {
            seg.validate()?;
            if self.segments[..i].iter().any(|s| s.id == seg.id) {
                return Err(Error::Validation(format!("duplicate segment id {}", seg.id)));
            }
        }
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Export,
    Cut,
    Merge,
    Snapshot,
}

/// Lifecycle: `pending -> processing -> {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

/// Handle for one asynchronous export. Lives only in process memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub project_id: ProjectId,
    pub status: OperationStatus,
    /// 0..=100, non-decreasing while processing.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Operation {
    pub fn new(kind: OperationKind, project_id: ProjectId) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            project_id,
            status: OperationStatus::Pending,
            progress: 0.0,
            output_files: Vec::new(),
            error: None,
            error_kind: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// Lifecycle: `pending -> downloading -> {completed, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }
}

/// A URL download, persisted on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Download {
    pub id: DownloadId,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub status: DownloadStatus,
    /// Percentage 0..=100.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<VideoId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Download {
    pub fn new(url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DownloadId::new(),
            url: url.into(),
            title: None,
            duration: None,
            status: DownloadStatus::Pending,
            progress: 0.0,
            file_path: None,
            video_id: None,
            error: None,
            error_kind: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a failure. No-op once the download is terminal.
    pub fn fail(&mut self, err: &Error) {
        if self.status.is_terminal() {
            return;
        }
        self.status = DownloadStatus::Failed;
        self.error = Some(err.user_message());
        self.error_kind = Some(err.kind());
        self.updated_at = Utc::now();
    }
}
