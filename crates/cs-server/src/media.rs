//! Media ingest and snapshots.

use std::path::{Path, PathBuf};

use chrono::Utc;

use cs_core::{Error, MediaFile, Result, VideoId};
use cs_store::queries::videos;

use crate::context::AppContext;

/// Extension for stored bytes: the original's, if it is short and
/// alphanumeric, else `bin`.
fn stored_extension(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "bin".to_string())
}

/// Move `source` into `uploads/`, probe it, and persist a [`MediaFile`].
///
/// A failed probe is not fatal: the file is kept with zero duration and no
/// stream descriptors.
pub async fn ingest_file(
    ctx: &AppContext,
    source: &Path,
    original_name: &str,
    original_url: Option<String>,
) -> Result<MediaFile> {
    let id = VideoId::new();
    let dest = ctx
        .store
        .uploads_dir()
        .join(format!("{id}.{}", stored_extension(original_name)));

    let (from, to) = (source.to_path_buf(), dest.clone());
    tokio::task::spawn_blocking(move || cs_store::move_file(&from, &to))
        .await
        .map_err(|e| Error::Internal(format!("ingest task: {e}")))??;

    let size = tokio::fs::metadata(&dest).await?.len();

    let mut video = MediaFile {
        id,
        file_name: original_name.to_string(),
        path: dest.clone(),
        size,
        duration: 0.0,
        container: String::new(),
        streams: Vec::new(),
        chapters: Vec::new(),
        original_url,
        created_at: Utc::now(),
    };

    match ctx.transcoder.probe(&dest).await {
        Ok(summary) => {
            video.duration = summary.duration;
            video.container = summary.container;
            video.streams = summary.streams;
            video.chapters = summary.chapters;
        }
        Err(e) => {
            tracing::warn!(video_id = %id, path = %dest.display(), error = %e, "Probe failed; keeping file without metadata");
        }
    }

    videos::save_video(&ctx.store, &video)?;
    tracing::info!(
        video_id = %id,
        file_name = %video.file_name,
        size,
        duration = video.duration,
        "Media ingested"
    );
    Ok(video)
}

/// Look up a video or fail with `NotFound`.
pub fn require_video(ctx: &AppContext, id: VideoId) -> Result<MediaFile> {
    videos::get_video(&ctx.store, id)?.ok_or_else(|| Error::not_found("video", id))
}

/// Grab one frame of `video_id` at `timestamp` into `screenshots/`.
pub async fn take_snapshot(
    ctx: &AppContext,
    video_id: VideoId,
    timestamp: f64,
    quality: u8,
) -> Result<PathBuf> {
    let video = require_video(ctx, video_id)?;
    if !timestamp.is_finite() || timestamp < 0.0 {
        return Err(Error::Validation("timestamp must be non-negative".into()));
    }
    if video.duration > 0.0 && timestamp > video.duration {
        return Err(Error::Validation(format!(
            "timestamp {timestamp:.3}s is beyond the end of the video ({:.3}s)",
            video.duration
        )));
    }
    if !(1..=31).contains(&quality) {
        return Err(Error::Validation("quality must be between 1 and 31".into()));
    }
    // An unprobed file has no stream list; let ffmpeg decide then.
    if !video.streams.is_empty() && !video.has_video() {
        return Err(Error::Validation(format!(
            "{} has no video stream to take a snapshot from",
            video.file_name
        )));
    }

    let output = ctx
        .store
        .screenshots_dir()
        .join(format!("{video_id}_{timestamp:.3}.jpg"));
    ctx.transcoder
        .snapshot(&video.path, &output, timestamp, quality)
        .await?;
    tracing::debug!(%video_id, timestamp, output = %output.display(), "Snapshot written");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_sanitised() {
        assert_eq!(stored_extension("Clip.MP4"), "mp4");
        assert_eq!(stored_extension("archive.tar.gz"), "gz");
        assert_eq!(stored_extension("noext"), "bin");
        assert_eq!(stored_extension("weird.mp4;rm"), "bin");
        assert_eq!(stored_extension("long.abcdefghijk"), "bin");
    }
}
