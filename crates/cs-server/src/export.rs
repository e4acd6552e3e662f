//! Export orchestration.
//!
//! An export turns a project's segments into published files:
//!
//! - one segment: a single cut
//! - several segments, any combination of
//!   - merge (the default when no mode is requested): cut each segment to a
//!     fragment, then concatenate the fragments in project order
//!   - separate: one file per segment
//!   - chapters: a chapter artifact describing the segments
//!
//! Work happens in a per-operation directory under `temp/`. With staging
//! enabled, outputs are written there too and only moved into `outputs/`
//! once every requested branch has succeeded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use cs_av::{CutJob, ProgressFn};
use cs_core::chapters::{self, ChapterFormat};
use cs_core::config::ExportConfig;
use cs_core::{Error, OperationId, Project, Result, Segment, SegmentId};
use cs_store::queries::videos;

use crate::context::AppContext;
use crate::operations::OperationRegistry;

/// Body of `POST /api/projects/{id}/export`.
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct ExportRequest {
    /// Container extension, e.g. `mp4`. Defaults to the configured format.
    pub format: Option<String>,
    /// Base name for output files.
    pub output_name: Option<String>,
    /// Subset of segments to export; empty means all.
    pub segment_ids: Vec<SegmentId>,
    pub merge_segments: bool,
    pub export_separate: bool,
    pub export_chapters: bool,
    /// `txt`, `xml` or `json`.
    pub chapters_format: Option<String>,
}

/// A validated export request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPlan {
    pub base_name: String,
    pub format: String,
    pub segment_ids: Vec<SegmentId>,
    /// Merge branch runs (explicitly requested or by default).
    pub merge: bool,
    /// Merge was asked for by name; changes the output name.
    pub explicit_merge: bool,
    pub separate: bool,
    pub chapters: Option<ChapterFormat>,
}

impl ExportPlan {
    /// Validate `req` against `project`. Input problems fail here, before
    /// any operation exists.
    pub fn from_request(req: ExportRequest, project: &Project, cfg: &ExportConfig) -> Result<Self> {
        let format = req
            .format
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(cfg.default_format.as_str())
            .trim_start_matches('.')
            .to_ascii_lowercase();
        if format.is_empty() || format.len() > 8 || !format.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Validation(format!("invalid output format '{format}'")));
        }

        let base_name = match req.output_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => sanitize_stem(name),
            _ => sanitize_stem(&format!(
                "{}_export_{}",
                project.name,
                chrono::Utc::now().timestamp()
            )),
        };

        for id in &req.segment_ids {
            if project.segment(*id).is_none() {
                return Err(Error::not_found("segment", id));
            }
        }

        let chapters = if req.export_chapters {
            Some(match req.chapters_format.as_deref() {
                Some(f) => f.parse()?,
                None => ChapterFormat::default(),
            })
        } else {
            None
        };

        let defaulted = !req.merge_segments && !req.export_separate && !req.export_chapters;

        Ok(Self {
            base_name,
            format,
            segment_ids: req.segment_ids,
            merge: req.merge_segments || defaulted,
            explicit_merge: req.merge_segments,
            separate: req.export_separate,
            chapters,
        })
    }

    fn file(&self, suffix: &str) -> String {
        format!("{}{suffix}.{}", self.base_name, self.format)
    }

    fn merged_file(&self) -> String {
        if self.explicit_merge {
            self.file("_merged")
        } else {
            self.file("")
        }
    }
}

/// Reduce `name` to `[A-Za-z0-9._-]`, with no leading dots.
pub fn sanitize_stem(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "export".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Run one export to a terminal state. Spawned on the worker pool.
pub async fn run_export(
    ctx: AppContext,
    op_id: OperationId,
    project: Project,
    plan: ExportPlan,
    cancel: CancellationToken,
) {
    let span = tracing::info_span!("export", operation_id = %op_id, project_id = %project.id);
    async move {
        if !ctx.operations.start(op_id) {
            return;
        }
        match execute(&ctx, op_id, &project, &plan, &cancel).await {
            Ok(outputs) => {
                ctx.operations.complete(op_id, outputs);
            }
            Err(e) => {
                ctx.operations.fail(op_id, &e);
            }
        }
    }
    .instrument(span)
    .await
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled("export cancelled".into()));
    }
    Ok(())
}

async fn execute(
    ctx: &AppContext,
    op_id: OperationId,
    project: &Project,
    plan: &ExportPlan,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    ensure_live(cancel)?;

    let video = videos::get_video(&ctx.store, project.video_id)?
        .ok_or_else(|| Error::not_found("video", project.video_id))?;

    let segments = project.resolve_segments(&plan.segment_ids);
    if segments.is_empty() {
        return Err(Error::Validation("no segments to export".into()));
    }

    let cfg = &ctx.config.export;
    let workspace = ExportWorkspace::new(&ctx.store.temp_dir(), op_id, cfg.stage_outputs, ctx.store.outputs_dir())?;
    let progress = Progress {
        registry: ctx.operations.clone(),
        id: op_id,
    };
    let fallback = cfg.missing_end_secs;
    let job = |seg: &Segment, output: PathBuf| CutJob {
        input: video.path.clone(),
        output,
        start: seg.start,
        end: seg.effective_end(fallback),
    };

    tracing::info!(
        segments = segments.len(),
        merge = plan.merge,
        separate = plan.separate,
        chapters = plan.chapters.is_some(),
        staged = cfg.stage_outputs,
        "Export started"
    );

    let mut produced = Vec::new();

    if segments.len() == 1 {
        ensure_live(cancel)?;
        let out = workspace.output(&plan.file(""));
        let report = progress.band(0.0, 100.0);
        ctx.transcoder
            .cut(&job(&segments[0], out.clone()), Some(&*report), cancel)
            .await?;
        produced.push(out);
    } else {
        let mut bands = Bands::new(plan);

        if plan.merge {
            let (lo, hi) = bands.take(1.0);
            let mut fragments = Vec::with_capacity(segments.len());
            for (i, seg) in segments.iter().enumerate() {
                ensure_live(cancel)?;
                let frag = workspace.fragment(i, &plan.format);
                let report = progress.band(slice(lo, hi, i, segments.len()), slice(lo, hi, i + 1, segments.len()));
                ctx.transcoder.cut(&job(seg, frag.clone()), Some(&*report), cancel).await?;
                fragments.push(frag);
            }

            ensure_live(cancel)?;
            let (lo, hi) = bands.take(1.0);
            let total: f64 = segments.iter().map(|s| s.effective_duration(fallback)).sum();
            let out = workspace.output(&plan.merged_file());
            let report = progress.band(lo, hi);
            ctx.transcoder
                .merge(&fragments, &out, workspace.path(), total, Some(&*report), cancel)
                .await?;
            for frag in &fragments {
                if let Err(e) = tokio::fs::remove_file(frag).await {
                    tracing::warn!(path = %frag.display(), error = %e, "Cannot remove fragment");
                }
            }
            produced.push(out);
        }

        if plan.separate {
            let (lo, hi) = bands.take(1.0);
            for (i, seg) in segments.iter().enumerate() {
                ensure_live(cancel)?;
                let out = workspace.output(&plan.file(&format!("_segment_{}", i + 1)));
                let report = progress.band(slice(lo, hi, i, segments.len()), slice(lo, hi, i + 1, segments.len()));
                ctx.transcoder.cut(&job(seg, out.clone()), Some(&*report), cancel).await?;
                produced.push(out);
            }
        }

        if let Some(format) = plan.chapters {
            ensure_live(cancel)?;
            let body = chapters::render(format, &segments, fallback)?;
            let out = workspace.output(&format!("{}_chapters.{}", plan.base_name, format.extension()));
            tokio::fs::write(&out, body)
                .await
                .map_err(|e| Error::pipeline("chapters", e.to_string()))?;
            produced.push(out);
        }
    }

    ensure_live(cancel)?;
    let published = workspace.publish(produced)?;
    Ok(published
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect())
}

/// `i`-th of `n` equal slices of `[lo, hi]`.
fn slice(lo: f64, hi: f64, i: usize, n: usize) -> f64 {
    lo + (hi - lo) * i as f64 / n.max(1) as f64
}

/// Splits 0..100 across the requested media branches. Fragment cutting and
/// the merge each count as one unit; separate files count as one.
struct Bands {
    cursor: f64,
    unit: f64,
}

impl Bands {
    fn new(plan: &ExportPlan) -> Self {
        let units = if plan.merge { 2.0 } else { 0.0 } + if plan.separate { 1.0 } else { 0.0 };
        Self {
            cursor: 0.0,
            unit: if units > 0.0 { 100.0 / units } else { 0.0 },
        }
    }

    fn take(&mut self, units: f64) -> (f64, f64) {
        let lo = self.cursor;
        self.cursor += self.unit * units;
        (lo, self.cursor)
    }
}

struct Progress {
    registry: Arc<OperationRegistry>,
    id: OperationId,
}

impl Progress {
    /// Callback mapping a step's `[0, 1]` fraction onto `[lo, hi]` percent.
    fn band(&self, lo: f64, hi: f64) -> Box<ProgressFn> {
        let registry = self.registry.clone();
        let id = self.id;
        Box::new(move |fraction| registry.set_progress(id, lo + (hi - lo) * fraction.clamp(0.0, 1.0)))
    }
}

/// Per-operation scratch space under `temp/`, removed on drop.
struct ExportWorkspace {
    dir: TempDir,
    staged: bool,
    outputs_dir: PathBuf,
}

impl ExportWorkspace {
    fn new(temp_root: &Path, op_id: OperationId, staged: bool, outputs_dir: PathBuf) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("export-{op_id}-"))
            .tempdir_in(temp_root)
            .map_err(|e| Error::pipeline("export", format!("cannot create work directory: {e}")))?;
        if staged {
            std::fs::create_dir(dir.path().join("staged"))
                .map_err(|e| Error::pipeline("export", format!("cannot create staging directory: {e}")))?;
        }
        Ok(Self {
            dir,
            staged,
            outputs_dir,
        })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn fragment(&self, index: usize, format: &str) -> PathBuf {
        self.dir.path().join(format!("fragment_{index:04}.{format}"))
    }

    /// Where a final output is written while the export runs.
    fn output(&self, file_name: &str) -> PathBuf {
        if self.staged {
            self.dir.path().join("staged").join(file_name)
        } else {
            self.outputs_dir.join(file_name)
        }
    }

    /// Move staged outputs into `outputs/`, keeping their order. Unstaged
    /// outputs are already in place.
    fn publish(self, produced: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
        if !self.staged {
            return Ok(produced);
        }
        let mut published = Vec::with_capacity(produced.len());
        for staged in produced {
            let name = staged
                .file_name()
                .ok_or_else(|| Error::Internal(format!("staged output without name: {}", staged.display())))?;
            let dest = self.outputs_dir.join(name);
            cs_store::move_file(&staged, &dest).map_err(|e| e.in_step("publish"))?;
            published.push(dest);
        }
        tracing::debug!(files = published.len(), "Outputs published");
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with(segments: Vec<Segment>) -> Project {
        let mut p = Project::new("My Trip", cs_core::VideoId::new());
        p.segments = segments;
        p
    }

    fn plan(req: ExportRequest) -> ExportPlan {
        let project = project_with(vec![Segment::new("a", 0.0, Some(1.0))]);
        ExportPlan::from_request(req, &project, &ExportConfig::default()).unwrap()
    }

    #[test]
    fn merge_is_the_default_mode() {
        let p = plan(ExportRequest::default());
        assert!(p.merge);
        assert!(!p.explicit_merge);
        assert!(!p.separate);
        assert_eq!(p.chapters, None);
        assert_eq!(p.format, "mp4");
        assert!(p.base_name.starts_with("My_Trip_export_"));
        assert_eq!(p.merged_file(), format!("{}.mp4", p.base_name));
    }

    #[test]
    fn flags_are_independent() {
        let p = plan(ExportRequest {
            output_name: Some("out".into()),
            format: Some(".MKV".into()),
            export_separate: true,
            export_chapters: true,
            chapters_format: Some("xml".into()),
            ..Default::default()
        });
        assert!(!p.merge);
        assert!(p.separate);
        assert_eq!(p.chapters, Some(ChapterFormat::Xml));
        assert_eq!(p.file("_segment_2"), "out_segment_2.mkv");

        let p = plan(ExportRequest {
            output_name: Some("out".into()),
            merge_segments: true,
            ..Default::default()
        });
        assert_eq!(p.merged_file(), "out_merged.mp4");
    }

    #[test]
    fn rejects_bad_input() {
        let project = project_with(vec![Segment::new("a", 0.0, Some(1.0))]);
        let cfg = ExportConfig::default();

        let bad_format = ExportRequest {
            format: Some("mp4/../x".into()),
            ..Default::default()
        };
        assert!(matches!(
            ExportPlan::from_request(bad_format, &project, &cfg).unwrap_err(),
            Error::Validation(_)
        ));

        let unknown_segment = ExportRequest {
            segment_ids: vec![SegmentId::new()],
            ..Default::default()
        };
        assert!(matches!(
            ExportPlan::from_request(unknown_segment, &project, &cfg).unwrap_err(),
            Error::NotFound { .. }
        ));

        let bad_chapters = ExportRequest {
            export_chapters: true,
            chapters_format: Some("srt".into()),
            ..Default::default()
        };
        assert!(matches!(
            ExportPlan::from_request(bad_chapters, &project, &cfg).unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_stem("a b/c\\d"), "a_b_c_d");
        assert_eq!(sanitize_stem("../etc"), "_etc");
        assert_eq!(sanitize_stem("..."), "export");
        assert_eq!(sanitize_stem("clip-1.final"), "clip-1.final");
    }

    #[test]
    fn bands_cover_the_range() {
        let both = ExportPlan {
            base_name: "x".into(),
            format: "mp4".into(),
            segment_ids: Vec::new(),
            merge: true,
            explicit_merge: true,
            separate: true,
            chapters: None,
        };
        let mut bands = Bands::new(&both);
        let frags = bands.take(1.0);
        let merge = bands.take(1.0);
        let sep = bands.take(1.0);
        assert_eq!(frags.0, 0.0);
        assert_eq!(frags.1, merge.0);
        assert_eq!(merge.1, sep.0);
        assert!((sep.1 - 100.0).abs() < 1e-9);
        assert_eq!(slice(0.0, 50.0, 1, 2), 25.0);
    }
}
