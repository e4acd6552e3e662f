//! Published export artifacts.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;

use crate::context::AppContext;
use crate::error::AppError;
use crate::streaming;

/// GET /api/outputs/{filename}
#[utoipa::path(
    get,
    path = "/api/outputs/{filename}",
    params(("filename" = String, Path, description = "Output file name")),
    responses(
        (status = 200, description = "Whole file"),
        (status = 206, description = "Requested byte range"),
        (status = 400, description = "Invalid file name"),
        (status = 404, description = "No such output"),
        (status = 416, description = "Range not satisfiable")
    )
)]
pub async fn download_output(
    State(ctx): State<AppContext>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let path = ctx.store.output_path(&filename)?;
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let response =
        streaming::serve_file(&path, range, &ctx.config.streaming, Some(&filename)).await?;
    Ok(response)
}
