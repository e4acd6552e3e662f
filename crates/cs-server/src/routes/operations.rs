//! Export operation status and cancellation.

use axum::extract::{Path, State};
use axum::Json;

use cs_core::{parse_id, Error, Operation, OperationId};

use crate::context::AppContext;
use crate::error::AppError;

/// GET /api/operations
#[utoipa::path(
    get,
    path = "/api/operations",
    responses((status = 200, description = "All operations, newest first", body = Vec<Operation>))
)]
pub async fn list_operations(State(ctx): State<AppContext>) -> Json<Vec<Operation>> {
    Json(ctx.operations.list())
}

/// GET /api/operations/{id}
#[utoipa::path(
    get,
    path = "/api/operations/{id}",
    params(("id" = String, Path, description = "Operation id")),
    responses(
        (status = 200, description = "Operation snapshot", body = Operation),
        (status = 404, description = "Unknown operation")
    )
)]
pub async fn get_operation(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Operation>, AppError> {
    let id: OperationId = parse_id(&id, "operation id")?;
    let op = ctx
        .operations
        .get(id)
        .ok_or_else(|| Error::not_found("operation", id))?;
    Ok(Json(op))
}

/// POST /api/operations/{id}/cancel
#[utoipa::path(
    post,
    path = "/api/operations/{id}/cancel",
    params(("id" = String, Path, description = "Operation id")),
    responses(
        (status = 200, description = "Cancellation requested", body = Operation),
        (status = 404, description = "Unknown operation"),
        (status = 409, description = "Operation already finished")
    )
)]
pub async fn cancel_operation(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Operation>, AppError> {
    let id: OperationId = parse_id(&id, "operation id")?;
    Ok(Json(ctx.operations.cancel(id)?))
}
