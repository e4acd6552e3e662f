//! Project, segment and export route handlers.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Deserializer};

use cs_core::{parse_id, Error, OperationKind, Project, ProjectId, Segment, SegmentId, VideoId};
use cs_store::queries::projects;

use crate::context::AppContext;
use crate::error::AppError;
use crate::export::{self, ExportPlan, ExportRequest};

fn parse_project_id(raw: &str) -> cs_core::Result<ProjectId> {
    parse_id(raw, "project id")
}

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateProjectRequest {
    pub name: String,
    pub video_id: String,
}

/// A segment as sent by clients. `id` is generated when absent.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct SegmentInput {
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub start: f64,
    pub end: Option<f64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub color: Option<u32>,
    #[serde(default)]
    pub selected: bool,
}

impl SegmentInput {
    fn into_segment(self) -> cs_core::Result<Segment> {
        let mut seg = Segment::new(self.name, self.start, self.end);
        if let Some(raw) = self.id.as_deref() {
            seg.id = parse_id(raw, "segment id")?;
        }
        seg.tags = self.tags;
        seg.color = self.color;
        seg.selected = self.selected;
        seg.validate()?;
        Ok(seg)
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    /// Replaces the whole list, in the given order.
    pub segments: Option<Vec<SegmentInput>>,
}

/// Partial segment update. `end: null` clears the end time.
#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct UpdateSegmentRequest {
    pub name: Option<String>,
    pub start: Option<f64>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<f64>)]
    pub end: Option<Option<f64>>,
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<u32>)]
    pub color: Option<Option<u32>>,
    pub selected: Option<bool>,
}

impl UpdateSegmentRequest {
    fn apply(self, seg: &mut Segment) {
        if let Some(name) = self.name {
            seg.name = name;
        }
        if let Some(start) = self.start {
            seg.start = start;
        }
        if let Some(end) = self.end {
            seg.end = end;
        }
        if let Some(tags) = self.tags {
            seg.tags = tags;
        }
        if let Some(color) = self.color {
            seg.color = color;
        }
        if let Some(selected) = self.selected {
            seg.selected = selected;
        }
    }
}

/// POST /api/projects
#[utoipa::path(
    post,
    path = "/api/projects",
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 404, description = "Unknown video")
    )
)]
pub async fn create_project(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    let video_id: VideoId = parse_id(&req.video_id, "video id")?;
    let name = req.name;
    let project = ctx
        .with_store(move |store| projects::create_project(store, &name, video_id))
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /api/projects
#[utoipa::path(
    get,
    path = "/api/projects",
    responses((status = 200, description = "All projects, newest first", body = Vec<Project>))
)]
pub async fn list_projects(State(ctx): State<AppContext>) -> Result<Json<Vec<Project>>, AppError> {
    Ok(Json(ctx.with_store(projects::list_projects).await?))
}

/// GET /api/projects/{id}
#[utoipa::path(
    get,
    path = "/api/projects/{id}",
    params(("id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project", body = Project),
        (status = 404, description = "Unknown project")
    )
)]
pub async fn get_project(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Project>, AppError> {
    let id = parse_project_id(&id)?;
    Ok(Json(
        ctx.with_store(move |store| projects::require_project(store, id))
            .await?,
    ))
}

/// PUT /api/projects/{id}
#[utoipa::path(
    put,
    path = "/api/projects/{id}",
    params(("id" = String, Path, description = "Project id")),
    request_body = UpdateProjectRequest,
    responses(
        (status = 200, description = "Updated project", body = Project),
        (status = 400, description = "Invalid segment"),
        (status = 404, description = "Unknown project")
    )
)]
pub async fn update_project(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<Project>, AppError> {
    let id = parse_project_id(&id)?;
    let segments = req
        .segments
        .map(|list| {
            list.into_iter()
                .map(SegmentInput::into_segment)
                .collect::<cs_core::Result<Vec<_>>>()
        })
        .transpose()?;
    let name = req.name;
    let project = ctx
        .with_store(move |store| projects::update_project(store, id, name, segments))
        .await?;
    Ok(Json(project))
}

/// DELETE /api/projects/{id}
#[utoipa::path(
    delete,
    path = "/api/projects/{id}",
    params(("id" = String, Path, description = "Project id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown project")
    )
)]
pub async fn delete_project(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_project_id(&id)?;
    if !ctx
        .with_store(move |store| projects::delete_project(store, id))
        .await?
    {
        return Err(Error::not_found("project", id).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/projects/{id}/segments
#[utoipa::path(
    post,
    path = "/api/projects/{id}/segments",
    params(("id" = String, Path, description = "Project id")),
    request_body = SegmentInput,
    responses(
        (status = 201, description = "Segment appended", body = Segment),
        (status = 400, description = "Invalid segment"),
        (status = 404, description = "Unknown project")
    )
)]
pub async fn add_segment(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(input): Json<SegmentInput>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_project_id(&id)?;
    let segment = input.into_segment()?;
    let segment = ctx
        .with_store(move |store| projects::add_segment(store, id, segment))
        .await?;
    Ok((StatusCode::CREATED, Json(segment)))
}

/// PUT /api/projects/{id}/segments/{segment_id}
#[utoipa::path(
    put,
    path = "/api/projects/{id}/segments/{segment_id}",
    params(
        ("id" = String, Path, description = "Project id"),
        ("segment_id" = String, Path, description = "Segment id")
    ),
    request_body = UpdateSegmentRequest,
    responses(
        (status = 200, description = "Updated segment", body = Segment),
        (status = 400, description = "Invalid segment"),
        (status = 404, description = "Unknown project or segment")
    )
)]
pub async fn update_segment(
    State(ctx): State<AppContext>,
    Path((id, segment_id)): Path<(String, String)>,
    Json(req): Json<UpdateSegmentRequest>,
) -> Result<Json<Segment>, AppError> {
    let id = parse_project_id(&id)?;
    let segment_id: SegmentId = parse_id(&segment_id, "segment id")?;
    let segment = ctx
        .with_store(move |store| {
            projects::update_segment(store, id, segment_id, move |seg| req.apply(seg))
        })
        .await?;
    Ok(Json(segment))
}

/// DELETE /api/projects/{id}/segments/{segment_id}
#[utoipa::path(
    delete,
    path = "/api/projects/{id}/segments/{segment_id}",
    params(
        ("id" = String, Path, description = "Project id"),
        ("segment_id" = String, Path, description = "Segment id")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown project or segment")
    )
)]
pub async fn delete_segment(
    State(ctx): State<AppContext>,
    Path((id, segment_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let id = parse_project_id(&id)?;
    let segment_id: SegmentId = parse_id(&segment_id, "segment id")?;
    ctx.with_store(move |store| projects::delete_segment(store, id, segment_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/projects/{id}/export
///
/// Returns at once with a pending operation; poll
/// `/api/operations/{id}` for progress.
#[utoipa::path(
    post,
    path = "/api/projects/{id}/export",
    params(("id" = String, Path, description = "Project id")),
    request_body = ExportRequest,
    responses(
        (status = 202, description = "Export accepted", body = cs_core::Operation),
        (status = 400, description = "Invalid export options"),
        (status = 404, description = "Unknown project or segment"),
        (status = 503, description = "Too many jobs in progress")
    )
)]
pub async fn export_project(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<ExportRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_project_id(&id)?;
    let project = ctx
        .with_store(move |store| projects::require_project(store, id))
        .await?;
    let plan = ExportPlan::from_request(req, &project, &ctx.config.export)?;
    let admission = ctx.pool.try_admit()?;

    let (op, cancel) = ctx.operations.create(OperationKind::Export, project.id);
    tracing::info!(
        operation_id = %op.id,
        project_id = %project.id,
        base_name = %plan.base_name,
        "Export accepted"
    );
    admission.spawn(export::run_export(ctx.clone(), op.id, project, plan, cancel));

    Ok((StatusCode::ACCEPTED, Json(op)))
}
