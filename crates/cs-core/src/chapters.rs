//! Chapter artifacts derived from a segment list.
//!
//! All three formats are rendered from the same [`ChapterEntry`] list, so
//! names, ordering, and the missing-end fallback cannot drift between them.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Segment;

/// Output format for a chapter artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChapterFormat {
    #[default]
    Txt,
    Xml,
    Json,
}

impl ChapterFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ChapterFormat::Txt => "txt",
            ChapterFormat::Xml => "xml",
            ChapterFormat::Json => "json",
        }
    }
}

impl FromStr for ChapterFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "txt" => Ok(ChapterFormat::Txt),
            "xml" => Ok(ChapterFormat::Xml),
            "json" => Ok(ChapterFormat::Json),
            other => Err(Error::Validation(format!(
                "unsupported chapters format '{other}' (valid: txt, xml, json)"
            ))),
        }
    }
}

/// One chapter, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterEntry {
    pub start: f64,
    pub end: f64,
    pub name: String,
}

/// Build chapter entries in segment order. Unnamed segments become
/// "Chapter N" (1-based).
pub fn chapter_entries(segments: &[Segment], missing_end_secs: f64) -> Vec<ChapterEntry> {
    segments
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            let name = if seg.name.trim().is_empty() {
                format!("Chapter {}", i + 1)
            } else {
                seg.name.clone()
            };
            ChapterEntry {
                start: seg.start,
                end: seg.effective_end(missing_end_secs),
                name,
            }
        })
        .collect()
}

/// Render the chapter artifact for `segments` in the given format.
pub fn render(format: ChapterFormat, segments: &[Segment], missing_end_secs: f64) -> Result<String> {
    let entries = chapter_entries(segments, missing_end_secs);
    match format {
        ChapterFormat::Txt => Ok(render_txt(&entries)),
        ChapterFormat::Xml => Ok(render_xml(&entries)),
        ChapterFormat::Json => serde_json::to_string_pretty(&entries)
            .map_err(|e| Error::Internal(format!("chapter serialization failed: {e}"))),
    }
}

/// Format seconds as `HH:MM:SS.mmm`.
pub fn format_chapter_time(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        ms
    )
}

fn render_txt(entries: &[ChapterEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(out, "{}", entry.name);
        let _ = writeln!(out, "{}", format_chapter_time(entry.start));
        let _ = writeln!(out, "{}", format_chapter_time(entry.end));
        out.push('\n');
    }
    out
}

fn render_xml(entries: &[ChapterEntry]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<chapters>\n");
    for entry in entries {
        let _ = write!(
            out,
            "  <chapter>\n    <start>{:.6}</start>\n    <end>{:.6}</end>\n    <title>{}</title>\n  </chapter>\n",
            entry.start,
            entry.end,
            xml_escape(&entry.name)
        );
    }
    out.push_str("</chapters>\n");
    out
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
