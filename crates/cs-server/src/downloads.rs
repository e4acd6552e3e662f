//! URL downloads.
//!
//! Direct media links are fetched with reqwest; anything else goes through
//! yt-dlp. Every status change is persisted so the history survives
//! restarts, and progress is persisted at most once per configured interval.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::Url;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use cs_core::{Download, DownloadId, DownloadStatus, Error, Result};
use cs_store::queries::downloads;
use cs_store::Store;

use crate::context::AppContext;
use crate::media;

/// Extensions that mark a URL as a plain media file.
const DIRECT_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mkv", "webm", "mov", "avi", "ts", "flv", "wmv", "mp3", "m4a", "aac", "wav",
    "ogg", "opus", "flac",
];

/// Cancel tokens of downloads running in this process.
#[derive(Default)]
pub struct DownloadTokens {
    tokens: DashMap<DownloadId, CancellationToken>,
}

impl DownloadTokens {
    fn register(&self, id: DownloadId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.insert(id, token.clone());
        token
    }

    fn release(&self, id: DownloadId) {
        self.tokens.remove(&id);
    }

    /// Trip the token for `id`. Returns false when nothing is running.
    pub fn cancel(&self, id: DownloadId) -> bool {
        match self.tokens.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.tokens.iter() {
            entry.value().cancel();
        }
    }
}

/// Body of `POST /api/downloads`.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct DownloadRequest {
    pub url: String,
    /// yt-dlp format selector; ignored for direct links.
    #[serde(default)]
    pub format: Option<String>,
}

/// Accept only absolute http(s) URLs.
pub fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| Error::Validation(format!("invalid url: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(Error::Validation(format!("unsupported url: {raw}"))),
    }
}

/// Whether `url` points straight at a media file: its path ends in a known
/// media extension, or a query parameter hints at a video/audio type.
pub fn is_direct_media_url(url: &Url) -> bool {
    let by_extension = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .and_then(|name| Path::new(name).extension())
        .and_then(|e| e.to_str())
        .is_some_and(|e| DIRECT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));

    by_extension
        || url.query_pairs().any(|(k, v)| {
            matches!(k.as_ref(), "mime" | "mime_type" | "content-type" | "content_type")
                && (v.starts_with("video/") || v.starts_with("audio/"))
        })
}

/// Create a download record and run it on the worker pool.
pub fn start_download(ctx: &AppContext, req: DownloadRequest) -> Result<Download> {
    let url = parse_url(&req.url)?;
    let admission = ctx.pool.try_admit()?;

    let download = Download::new(url.as_str());
    downloads::save_download(&ctx.store, &download)?;
    let cancel = ctx.downloads.register(download.id);
    tracing::info!(download_id = %download.id, url = %url, "Download queued");

    let span = tracing::info_span!("download", download_id = %download.id);
    admission.spawn(
        run_download(ctx.clone(), download.clone(), url, req.format, cancel).instrument(span),
    );
    Ok(download)
}

/// Request cancellation. Terminal downloads are a conflict; a pending record
/// with no live task (left over from a previous run) is cancelled directly.
pub fn cancel_download(ctx: &AppContext, id: DownloadId) -> Result<Download> {
    let mut download =
        downloads::get_download(&ctx.store, id)?.ok_or_else(|| Error::not_found("download", id))?;
    if download.status.is_terminal() {
        return Err(Error::Conflict(format!("download {id} already finished")));
    }
    if ctx.downloads.cancel(id) {
        tracing::info!(download_id = %id, "Download cancellation requested");
        return Ok(download);
    }
    download.status = DownloadStatus::Cancelled;
    download.updated_at = Utc::now();
    downloads::save_download(&ctx.store, &download)?;
    Ok(download)
}

/// Mark downloads left running by a previous process as failed.
pub fn recover_interrupted(store: &Store) -> Result<usize> {
    let mut recovered = 0;
    for mut d in downloads::list_downloads(store)? {
        if d.status.is_terminal() {
            continue;
        }
        d.fail(&Error::Internal("interrupted by server restart".into()));
        downloads::save_download(store, &d)?;
        recovered += 1;
    }
    if recovered > 0 {
        tracing::warn!(recovered, "Marked interrupted downloads as failed");
    }
    Ok(recovered)
}

/// Owns the record while the task runs and throttles progress writes.
struct Tracker<'a> {
    store: &'a Store,
    download: Download,
    interval: Duration,
    last_saved: Instant,
}

impl<'a> Tracker<'a> {
    fn new(store: &'a Store, download: Download, interval: Duration) -> Self {
        Self {
            store,
            download,
            interval,
            last_saved: Instant::now(),
        }
    }

    fn save(&mut self) {
        self.download.updated_at = Utc::now();
        if let Err(e) = downloads::save_download(self.store, &self.download) {
            tracing::warn!(download_id = %self.download.id, error = %e, "Cannot persist download");
        }
        self.last_saved = Instant::now();
    }

    fn progress(&mut self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        if percent <= self.download.progress {
            return;
        }
        self.download.progress = percent;
        if self.last_saved.elapsed() >= self.interval {
            tracing::debug!(download_id = %self.download.id, progress = percent, "Download progress");
            self.save();
        }
    }
}

async fn run_download(
    ctx: AppContext,
    download: Download,
    url: Url,
    format: Option<String>,
    cancel: CancellationToken,
) {
    let id = download.id;
    let interval = Duration::from_millis(ctx.config.download.progress_interval_ms);
    let mut tracker = Tracker::new(&ctx.store, download, interval);

    tracker.download.status = DownloadStatus::Downloading;
    tracker.save();

    let fetched = if cancel.is_cancelled() {
        Err(Error::Cancelled("download cancelled".into()))
    } else if is_direct_media_url(&url) {
        fetch_direct(&ctx, &mut tracker, &url, &cancel).await
    } else {
        let format = format.unwrap_or_else(|| ctx.config.download.format.clone());
        fetch_with_ytdlp(&ctx, &mut tracker, &url, &format, &cancel).await
    };

    let outcome = match fetched {
        Ok((path, name)) => media::ingest_file(&ctx, &path, &name, Some(url.to_string())).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(video) => {
            let d = &mut tracker.download;
            d.status = DownloadStatus::Completed;
            d.progress = 100.0;
            d.video_id = Some(video.id);
            d.file_path = Some(video.path.clone());
            if d.duration.is_none() && video.duration > 0.0 {
                d.duration = Some(video.duration);
            }
            tracing::info!(download_id = %id, video_id = %video.id, "Download completed");
        }
        Err(Error::Cancelled(_)) => {
            remove_partials(&ctx.store.download_files_dir(), id);
            tracker.download.status = DownloadStatus::Cancelled;
            tracing::info!(download_id = %id, "Download cancelled");
        }
        Err(e) => {
            remove_partials(&ctx.store.download_files_dir(), id);
            tracing::warn!(download_id = %id, error = %e, "Download failed");
            tracker.download.fail(&e);
        }
    }
    tracker.save();
    ctx.downloads.release(id);
}

/// Stream a plain HTTP resource to disk in chunks, checking for
/// cancellation between chunks.
async fn fetch_direct(
    ctx: &AppContext,
    tracker: &mut Tracker<'_>,
    url: &Url,
    cancel: &CancellationToken,
) -> Result<(PathBuf, String)> {
    let name = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|n| !n.is_empty())
        .unwrap_or("download.mp4")
        .to_string();
    let ext = Path::new(&name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4")
        .to_ascii_lowercase();
    tracker.download.title = Some(name.clone());

    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled("download cancelled".into())),
        sent = ctx.http.get(url.clone()).send() => sent
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::pipeline("download", e.to_string()))?,
    };
    let total = response.content_length().filter(|n| *n > 0);

    let dest = ctx
        .store
        .download_files_dir()
        .join(format!("{}.{ext}", tracker.download.id));
    let mut file = tokio::fs::File::create(&dest).await?;
    let mut received: u64 = 0;
    let mut body = response.bytes_stream();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled("download cancelled".into())),
            next = body.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|e| Error::pipeline("download", e.to_string()))?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
        if let Some(total) = total {
            tracker.progress(received as f64 / total as f64 * 100.0);
        }
    }
    file.flush().await?;
    drop(file);

    if cancel.is_cancelled() {
        return Err(Error::Cancelled("download cancelled".into()));
    }
    tracing::debug!(download_id = %tracker.download.id, bytes = received, "Direct download finished");
    Ok((dest, name))
}

async fn fetch_with_ytdlp(
    ctx: &AppContext,
    tracker: &mut Tracker<'_>,
    url: &Url,
    format: &str,
    cancel: &CancellationToken,
) -> Result<(PathBuf, String)> {
    let ytdlp = ctx.tools.require("yt-dlp")?.clone();

    match cs_av::ytdlp::fetch_info(&ytdlp, url.as_str()).await {
        Ok(info) => {
            tracker.download.title = info.title;
            tracker.download.duration = info.duration;
            tracker.save();
        }
        Err(e) => tracing::warn!(error = %e, "yt-dlp metadata lookup failed; downloading anyway"),
    }

    let dir = ctx.store.download_files_dir();
    let stem = tracker.download.id.to_string();
    let template = dir.join(format!("{stem}.%(ext)s"));
    cs_av::ytdlp::download(
        &ytdlp,
        url.as_str(),
        format,
        &template.to_string_lossy(),
        |pct| tracker.progress(pct),
        Some(cancel),
    )
    .await
    .map_err(|e| e.in_step("download"))?;

    let path = cs_av::ytdlp::locate_output(&dir, &stem)
        .ok_or_else(|| Error::pipeline("download", "yt-dlp finished without an output file"))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
    let title = tracker.download.title.clone().unwrap_or_else(|| stem.clone());
    Ok((path.clone(), format!("{title}.{ext}")))
}

/// Remove any bytes left in `files/` for download `id`.
fn remove_partials(dir: &Path, id: DownloadId) {
    let prefix = id.to_string();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                tracing::warn!(path = %entry.path().display(), error = %e, "Cannot remove partial download");
            }
        }
    }
}
