//! Range-serving file streamer.
//!
//! Range resolution is a pure function over the header and the file size;
//! the response side seeks once and streams exactly the resolved window
//! through a fixed-size buffer.

use std::path::Path;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use cs_core::config::StreamingConfig;

/// Parse a `Range: bytes=START-END` header value.
///
/// Returns `(start, Option<end>)`; `end` is `None` for open-ended ranges
/// like `bytes=500-`. Multi-range and suffix forms are not recognised.
pub fn parse_range_header(value: &str) -> Option<(u64, Option<u64>)> {
    let ranges = value.trim().strip_prefix("bytes=")?;
    if ranges.contains(',') {
        return None;
    }
    let (start_str, end_str) = ranges.split_once('-')?;
    let start: u64 = start_str.trim().parse().ok()?;
    let end_str = end_str.trim();
    let end = if end_str.is_empty() {
        None
    } else {
        Some(end_str.parse().ok()?)
    };
    Some((start, end))
}

/// What to send for a request against a file of a given size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// Whole file, 200.
    Full,
    /// Inclusive window, 206.
    Partial { start: u64, end: u64 },
    /// 416 with `bytes */size`.
    Unsatisfiable,
}

impl ByteRange {
    pub fn len(&self, file_size: u64) -> u64 {
        match *self {
            ByteRange::Full => file_size,
            ByteRange::Partial { start, end } => end - start + 1,
            ByteRange::Unsatisfiable => 0,
        }
    }

    pub fn is_empty(&self, file_size: u64) -> bool {
        self.len(file_size) == 0
    }
}

/// Decide the byte window for `range_header`.
///
/// - absent or unparseable header: full file
/// - `A-B`: requires `A <= B < size`
/// - `A-`: `A < size`, window capped at `max_chunk` bytes and at EOF
pub fn resolve_range(range_header: Option<&str>, file_size: u64, max_chunk: u64) -> ByteRange {
    let Some((start, end)) = range_header.and_then(parse_range_header) else {
        return ByteRange::Full;
    };
    if start >= file_size {
        return ByteRange::Unsatisfiable;
    }
    match end {
        Some(end) if start <= end && end < file_size => ByteRange::Partial { start, end },
        Some(_) => ByteRange::Unsatisfiable,
        None => {
            let window = max_chunk.max(1);
            let end = start.saturating_add(window - 1).min(file_size - 1);
            ByteRange::Partial { start, end }
        }
    }
}

/// MIME type from the file extension, falling back to
/// `application/octet-stream`.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "ts" => "video/mp2t",
        "flv" => "video/x-flv",
        "wmv" => "video/x-ms-wmv",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Serve `path` honouring `range_header`.
///
/// `attachment_name` adds a `Content-Disposition: attachment` header.
pub async fn serve_file(
    path: &Path,
    range_header: Option<&str>,
    cfg: &StreamingConfig,
    attachment_name: Option<&str>,
) -> cs_core::Result<Response> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| cs_core::Error::not_found("file", path.display()))?;
    if !metadata.is_file() {
        return Err(cs_core::Error::not_found("file", path.display()));
    }
    let file_size = metadata.len();
    let range = resolve_range(range_header, file_size, cfg.max_chunk_bytes);

    if range == ByteRange::Unsatisfiable {
        tracing::debug!(path = %path.display(), range = ?range_header, file_size, "Range not satisfiable");
        return Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [
                (header::CONTENT_RANGE, format!("bytes */{file_size}")),
                (header::ACCEPT_RANGES, "bytes".to_string()),
            ],
            Body::empty(),
        )
            .into_response());
    }

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|_| cs_core::Error::not_found("file", path.display()))?;
    let length = range.len(file_size);

    let status = match range {
        ByteRange::Partial { start, .. } => {
            file.seek(std::io::SeekFrom::Start(start)).await?;
            StatusCode::PARTIAL_CONTENT
        }
        _ => StatusCode::OK,
    };

    // Take bounds the body to exactly the declared length.
    let stream = ReaderStream::with_capacity(file.take(length), cfg.read_buffer_bytes.max(1));
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(path)));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let ByteRange::Partial { start, end } = range {
        if let Ok(v) = HeaderValue::from_str(&format!("bytes {start}-{end}/{file_size}")) {
            headers.insert(header::CONTENT_RANGE, v);
        }
    }
    if let Some(name) = attachment_name {
        let safe: String = name.chars().filter(|c| *c != '"' && !c.is_control()).collect();
        if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{safe}\"")) {
            headers.insert(header::CONTENT_DISPOSITION, v);
        }
    }

    Ok(response)
}
