//! yt-dlp invocation helpers: metadata lookup, download, and progress
//! parsing of `--newline` output.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::command::StreamSource;
use crate::tools::ToolConfig;

static DOWNLOAD_PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").expect("download progress pattern is a valid regex")
});

const INFO_TIMEOUT: Duration = Duration::from_secs(120);

/// Subset of `yt-dlp --dump-json` we care about.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct VideoInfo {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub ext: Option<String>,
}

/// Percentage (0..=100) from a `[download]  42.3% of ...` line.
pub fn parse_download_progress(line: &str) -> Option<f64> {
    let caps = DOWNLOAD_PROGRESS.captures(line)?;
    let pct: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(pct.min(100.0))
}

pub fn info_args(url: &str) -> Vec<String> {
    vec!["--dump-json".into(), "--no-playlist".into(), url.into()]
}

/// Arguments for the actual download. `output_template` may contain
/// yt-dlp fields such as `%(ext)s`.
pub fn download_args(url: &str, format: &str, output_template: &str) -> Vec<String> {
    vec![
        "--newline".into(),
        "--no-playlist".into(),
        "--progress".into(),
        "-f".into(),
        format.into(),
        "-o".into(),
        output_template.into(),
        url.into(),
    ]
}

/// Look up title and duration without downloading.
pub async fn fetch_info(ytdlp: &ToolConfig, url: &str) -> cs_core::Result<VideoInfo> {
    let output = ytdlp
        .command_within(INFO_TIMEOUT)
        .args(info_args(url))
        .execute()
        .await?;
    let first = output.stdout.lines().find(|l| !l.trim().is_empty()).unwrap_or("{}");
    serde_json::from_str(first)
        .map_err(|e| cs_core::Error::tool("yt-dlp", format!("unreadable metadata: {e}")))
}

/// Download `url` to `output_template`, reporting percentages.
pub async fn download<F>(
    ytdlp: &ToolConfig,
    url: &str,
    format: &str,
    output_template: &str,
    mut on_progress: F,
    cancel: Option<&CancellationToken>,
) -> cs_core::Result<()>
where
    F: FnMut(f64) + Send,
{
    ytdlp
        .command()
        .args(download_args(url, format, output_template))
        .stream_from(StreamSource::Stdout)
        .execute_streaming(
            |line| {
                if let Some(pct) = parse_download_progress(line) {
                    on_progress(pct);
                }
            },
            cancel,
        )
        .await?;
    Ok(())
}

/// Find the file yt-dlp produced for `stem` in `dir`, whatever extension
/// it picked. Partial `.part` files are ignored.
pub fn locate_output(dir: &Path, stem: &str) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .find(|p| {
            p.is_file()
                && p.file_stem().is_some_and(|s| s == stem)
                && p.extension().is_some_and(|e| e != "part" && e != "ytdl")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_lines() {
        assert_eq!(parse_download_progress("[download]  42.3% of 10.00MiB at 1.00MiB/s"), Some(42.3));
        assert_eq!(parse_download_progress("[download] 100% of 10.00MiB"), Some(100.0));
        assert_eq!(parse_download_progress("[download] Destination: video1.mp4"), None);
        assert_eq!(parse_download_progress("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn download_args_shape() {
        let args = download_args("https://v.example/x", "best", "/d/video1.%(ext)s");
        assert_eq!(args.first().unwrap(), "--newline");
        assert_eq!(args.last().unwrap(), "https://v.example/x");
        let f = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[f + 1], "best");
        let o = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[o + 1], "/d/video1.%(ext)s");
    }

    #[test]
    fn info_parses_subset() {
        let info: VideoInfo =
            serde_json::from_str(r#"{"title": "Clip", "duration": 61.5, "ext": "mp4", "id": "z"}"#)
                .unwrap();
        assert_eq!(info.title.as_deref(), Some("Clip"));
        assert_eq!(info.duration, Some(61.5));
    }

    #[test]
    fn locate_output_ignores_partials() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video7.mp4.part"), b"x").unwrap();
        assert!(locate_output(dir.path(), "video7").is_none());
        std::fs::write(dir.path().join("video7.webm"), b"x").unwrap();
        assert_eq!(
            locate_output(dir.path(), "video7").unwrap(),
            dir.path().join("video7.webm")
        );
    }
}
