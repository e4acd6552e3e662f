//! ffprobe-backed media inspection.
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format
//! -show_streams -show_chapters` and maps the JSON into a [`ProbeSummary`].

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cs_core::{ChapterInfo, StreamInfo, StreamKind};

use crate::tools::ToolConfig;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// What the rest of the system needs to know about a media file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeSummary {
    pub duration: f64,
    /// First entry of ffprobe's comma-separated `format_name`.
    pub container: String,
    pub size: Option<u64>,
    pub streams: Vec<StreamInfo>,
    pub chapters: Vec<ChapterInfo>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
    #[serde(default)]
    chapters: Vec<FfprobeChapter>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    format_name: String,
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u32>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeChapter {
    start_time: Option<String>,
    end_time: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Probe `file` with `ffprobe`.
pub async fn probe_file(ffprobe: &ToolConfig, file: &Path) -> cs_core::Result<ProbeSummary> {
    let output = ffprobe
        .command_within(PROBE_TIMEOUT)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-show_chapters",
        ])
        .arg(file.to_string_lossy())
        .execute()
        .await
        .map_err(|e| cs_core::Error::Probe(format!("{}: {}", file.display(), e.user_message())))?;

    parse_ffprobe_json(&output.stdout)
}

/// Parse ffprobe's JSON document.
pub fn parse_ffprobe_json(json: &str) -> cs_core::Result<ProbeSummary> {
    let raw: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| cs_core::Error::Probe(format!("invalid ffprobe output: {e}")))?;

    let format = raw
        .format
        .ok_or_else(|| cs_core::Error::Probe("ffprobe reported no format".into()))?;

    let duration = format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    let container = format
        .format_name
        .split(',')
        .next()
        .unwrap_or_default()
        .to_string();

    let streams = raw
        .streams
        .into_iter()
        .map(|s| StreamInfo {
            index: s.index,
            kind: StreamKind::from_codec_type(s.codec_type.as_deref().unwrap_or("")),
            codec: s.codec_name.unwrap_or_else(|| "unknown".into()),
            width: s.width,
            height: s.height,
            channels: s.channels,
            language: s.tags.get("language").cloned(),
        })
        .collect();

    let chapters = raw
        .chapters
        .into_iter()
        .filter_map(|c| {
            let start = c.start_time.as_deref()?.parse::<f64>().ok()?;
            let end = c.end_time.as_deref()?.parse::<f64>().ok()?;
            Some(ChapterInfo {
                start,
                end,
                title: c.tags.get("title").cloned(),
            })
        })
        .collect();

    Ok(ProbeSummary {
        duration,
        container,
        size: format.size.as_deref().and_then(|s| s.parse().ok()),
        streams,
        chapters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "channels": 2, "tags": {"language": "eng"}},
            {"index": 2, "codec_type": "data", "codec_name": "bin_data"}
        ],
        "chapters": [
            {"id": 0, "start_time": "0.000000", "end_time": "30.500000", "tags": {"title": "Opening"}}
        ],
        "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "125.480000", "size": "1048576"}
    }"#;

    #[test]
    fn parses_sample() {
        let summary = parse_ffprobe_json(SAMPLE).unwrap();
        assert_eq!(summary.container, "mov");
        assert!((summary.duration - 125.48).abs() < 1e-9);
        assert_eq!(summary.size, Some(1_048_576));
        assert_eq!(summary.streams.len(), 3);
        assert_eq!(summary.streams[0].kind, StreamKind::Video);
        assert_eq!(summary.streams[0].width, Some(1920));
        assert_eq!(summary.streams[1].language.as_deref(), Some("eng"));
        assert_eq!(summary.streams[2].kind, StreamKind::Data);
        assert_eq!(summary.chapters[0].title.as_deref(), Some("Opening"));
        assert_eq!(summary.chapters[0].end, 30.5);
    }

    #[test]
    fn missing_duration_is_zero() {
        let json = r#"{"streams": [], "format": {"format_name": "matroska,webm"}}"#;
        let summary = parse_ffprobe_json(json).unwrap();
        assert_eq!(summary.duration, 0.0);
        assert_eq!(summary.container, "matroska");
    }

    #[test]
    fn garbage_is_probe_error() {
        assert!(matches!(
            parse_ffprobe_json("not json"),
            Err(cs_core::Error::Probe(_))
        ));
        assert!(matches!(
            parse_ffprobe_json(r#"{"streams": []}"#),
            Err(cs_core::Error::Probe(_))
        ));
    }
}
