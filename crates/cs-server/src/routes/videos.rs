//! Media file routes: upload, listing, playback and snapshots.

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use cs_core::{parse_id, Error, MediaFile, VideoId};
use cs_store::queries::videos;

use crate::context::AppContext;
use crate::error::AppError;
use crate::{media, streaming};

fn parse_video_id(raw: &str) -> cs_core::Result<VideoId> {
    parse_id(raw, "video id")
}

/// GET /api/videos
#[utoipa::path(
    get,
    path = "/api/videos",
    responses((status = 200, description = "All media files, newest first", body = Vec<MediaFile>))
)]
pub async fn list_videos(State(ctx): State<AppContext>) -> Result<Json<Vec<MediaFile>>, AppError> {
    Ok(Json(videos::list_videos(&ctx.store)?))
}

/// POST /api/videos/upload
///
/// Multipart form with a single `file` field.
#[utoipa::path(
    post,
    path = "/api/videos/upload",
    responses(
        (status = 201, description = "Media ingested", body = MediaFile),
        (status = 400, description = "Missing or empty file field")
    )
)]
pub async fn upload_video(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let bad_form = |e: axum::extract::multipart::MultipartError| {
        Error::Validation(format!("invalid multipart body: {e}"))
    };

    while let Some(mut field) = multipart.next_field().await.map_err(bad_form)? {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field
            .file_name()
            .map(|n| n.rsplit(['/', '\\']).next().unwrap_or(n).to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "upload.mp4".to_string());

        let tmp = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(ctx.store.temp_dir())
            .map_err(Error::from)?;
        let (std_file, tmp_path) = tmp.into_parts();
        let mut file = tokio::fs::File::from_std(std_file);
        let mut written: u64 = 0;

        while let Some(chunk) = field.chunk().await.map_err(bad_form)? {
            written += chunk.len() as u64;
            if written > ctx.config.server.max_upload_bytes {
                return Err(Error::Validation(format!(
                    "upload exceeds the {} byte limit",
                    ctx.config.server.max_upload_bytes
                ))
                .into());
            }
            file.write_all(&chunk).await.map_err(Error::from)?;
        }
        file.flush().await.map_err(Error::from)?;
        drop(file);

        if written == 0 {
            return Err(Error::Validation("uploaded file is empty".into()).into());
        }

        tracing::debug!(file_name = %original_name, bytes = written, "Upload received");
        let video = media::ingest_file(&ctx, &tmp_path, &original_name, None).await?;
        return Ok((StatusCode::CREATED, Json(video)));
    }

    Err(Error::Validation("multipart field 'file' is required".into()).into())
}

/// GET /api/videos/{id}
#[utoipa::path(
    get,
    path = "/api/videos/{id}",
    params(("id" = String, Path, description = "Video id")),
    responses(
        (status = 200, description = "Media file", body = MediaFile),
        (status = 404, description = "Unknown video")
    )
)]
pub async fn get_video(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<MediaFile>, AppError> {
    let id = parse_video_id(&id)?;
    Ok(Json(media::require_video(&ctx, id)?))
}

/// DELETE /api/videos/{id}
///
/// Projects that reference the video keep their (now dangling) reference.
#[utoipa::path(
    delete,
    path = "/api/videos/{id}",
    params(("id" = String, Path, description = "Video id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown video")
    )
)]
pub async fn delete_video(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_video_id(&id)?;
    if !videos::delete_video(&ctx.store, id)? {
        return Err(Error::not_found("video", id).into());
    }
    tracing::info!(video_id = %id, "Video deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/videos/{id}/stream
#[utoipa::path(
    get,
    path = "/api/videos/{id}/stream",
    params(("id" = String, Path, description = "Video id")),
    responses(
        (status = 200, description = "Whole file"),
        (status = 206, description = "Requested byte range"),
        (status = 404, description = "Unknown video"),
        (status = 416, description = "Range not satisfiable")
    )
)]
pub async fn stream_video(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let id = parse_video_id(&id)?;
    let video = media::require_video(&ctx, id)?;
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    Ok(streaming::serve_file(&video.path, range, &ctx.config.streaming, None).await?)
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SnapshotRequest {
    /// Seconds from the start of the video.
    pub timestamp: f64,
    /// JPEG quality, 1 (best) to 31.
    #[serde(default = "default_quality")]
    pub quality: u8,
}

fn default_quality() -> u8 {
    2
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SnapshotResponse {
    pub video_id: String,
    pub timestamp: f64,
    pub path: String,
}

/// POST /api/videos/{id}/snapshot
#[utoipa::path(
    post,
    path = "/api/videos/{id}/snapshot",
    params(("id" = String, Path, description = "Video id")),
    request_body = SnapshotRequest,
    responses(
        (status = 201, description = "Frame written", body = SnapshotResponse),
        (status = 400, description = "Bad timestamp or quality"),
        (status = 404, description = "Unknown video")
    )
)]
pub async fn snapshot(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<SnapshotRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_video_id(&id)?;
    let path = media::take_snapshot(&ctx, id, req.timestamp, req.quality).await?;
    Ok((
        StatusCode::CREATED,
        Json(SnapshotResponse {
            video_id: id.to_string(),
            timestamp: req.timestamp,
            path: path.display().to_string(),
        }),
    ))
}
