//! Download route handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use cs_core::{parse_id, Download, DownloadId, Error};
use cs_store::queries::downloads as records;

use crate::context::AppContext;
use crate::downloads::{self, DownloadRequest};
use crate::error::AppError;

fn parse_download_id(raw: &str) -> cs_core::Result<DownloadId> {
    parse_id(raw, "download id")
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ClearedResponse {
    pub removed: usize,
}

/// POST /api/downloads
#[utoipa::path(
    post,
    path = "/api/downloads",
    request_body = DownloadRequest,
    responses(
        (status = 202, description = "Download queued", body = Download),
        (status = 400, description = "Invalid url"),
        (status = 503, description = "Too many jobs in progress")
    )
)]
pub async fn create_download(
    State(ctx): State<AppContext>,
    Json(req): Json<DownloadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let download = downloads::start_download(&ctx, req)?;
    Ok((StatusCode::ACCEPTED, Json(download)))
}

/// GET /api/downloads
#[utoipa::path(
    get,
    path = "/api/downloads",
    responses((status = 200, description = "All downloads, newest first", body = Vec<Download>))
)]
pub async fn list_downloads(State(ctx): State<AppContext>) -> Result<Json<Vec<Download>>, AppError> {
    Ok(Json(records::list_downloads(&ctx.store)?))
}

/// DELETE /api/downloads
///
/// Removes completed, failed and cancelled records.
#[utoipa::path(
    delete,
    path = "/api/downloads",
    responses((status = 200, description = "Finished records removed", body = ClearedResponse))
)]
pub async fn clear_downloads(State(ctx): State<AppContext>) -> Result<Json<ClearedResponse>, AppError> {
    let removed = records::clear_finished_downloads(&ctx.store)?;
    Ok(Json(ClearedResponse { removed }))
}

/// GET /api/downloads/{id}
#[utoipa::path(
    get,
    path = "/api/downloads/{id}",
    params(("id" = String, Path, description = "Download id")),
    responses(
        (status = 200, description = "Download record", body = Download),
        (status = 404, description = "Unknown download")
    )
)]
pub async fn get_download(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Download>, AppError> {
    let id = parse_download_id(&id)?;
    let download =
        records::get_download(&ctx.store, id)?.ok_or_else(|| Error::not_found("download", id))?;
    Ok(Json(download))
}

/// POST /api/downloads/{id}/cancel
#[utoipa::path(
    post,
    path = "/api/downloads/{id}/cancel",
    params(("id" = String, Path, description = "Download id")),
    responses(
        (status = 202, description = "Cancellation requested", body = Download),
        (status = 404, description = "Unknown download"),
        (status = 409, description = "Download already finished")
    )
)]
pub async fn cancel_download(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_download_id(&id)?;
    let download = downloads::cancel_download(&ctx, id)?;
    Ok((StatusCode::ACCEPTED, Json(download)))
}
