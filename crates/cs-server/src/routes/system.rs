//! System information and tool availability.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use cs_core::Error;

use crate::context::AppContext;
use crate::error::AppError;

#[derive(Serialize, utoipa::ToSchema)]
pub struct SystemInfoResponse {
    pub version: String,
    pub storage_path: String,
    pub tools: Vec<cs_av::ToolInfo>,
    pub jobs_in_flight: usize,
    pub jobs_capacity: usize,
}

/// GET /api/system/info
#[utoipa::path(
    get,
    path = "/api/system/info",
    responses((status = 200, description = "Version, storage and tool status", body = SystemInfoResponse))
)]
pub async fn info(State(ctx): State<AppContext>) -> Json<SystemInfoResponse> {
    Json(SystemInfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage_path: ctx.store.base().display().to_string(),
        tools: ctx.tool_status().await,
        jobs_in_flight: ctx.pool.in_flight(),
        jobs_capacity: ctx.pool.capacity(),
    })
}

/// GET /api/system/tools
#[utoipa::path(
    get,
    path = "/api/system/tools",
    responses(
        (status = 200, description = "List external tool availability", body = Vec<cs_av::ToolInfo>)
    )
)]
pub async fn tools(State(ctx): State<AppContext>) -> Json<Vec<cs_av::ToolInfo>> {
    Json(ctx.tool_status().await)
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ClearAllResponse {
    pub message: String,
    /// Files and records removed from storage.
    pub removed: usize,
    /// Finished operations dropped from the registry.
    pub operations_cleared: usize,
}

/// DELETE /api/system/clear-all
///
/// Wipes every video, project, download, output and temp entry. Refused
/// while any background job is still running.
#[utoipa::path(
    delete,
    path = "/api/system/clear-all",
    responses(
        (status = 200, description = "Storage wiped", body = ClearAllResponse),
        (status = 409, description = "Jobs are still running")
    )
)]
pub async fn clear_all(State(ctx): State<AppContext>) -> Result<Json<ClearAllResponse>, AppError> {
    let running = ctx.pool.in_flight();
    if running > 0 {
        return Err(Error::Conflict(format!(
            "{running} job(s) still running; cancel them before clearing"
        ))
        .into());
    }

    let removed = ctx.with_store(|store| store.clear_everything()).await?;
    let operations_cleared = ctx.operations.clear_finished();
    tracing::warn!(removed, operations_cleared, "All media, projects and history cleared");

    Ok(Json(ClearAllResponse {
        message: "All videos, downloads, projects, and history have been cleared".to_string(),
        removed,
        operations_cleared,
    }))
}
