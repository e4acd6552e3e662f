//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health_check,
        routes::system::info,
        routes::system::tools,
        routes::system::clear_all,
        routes::videos::list_videos,
        routes::videos::upload_video,
        routes::videos::get_video,
        routes::videos::delete_video,
        routes::videos::stream_video,
        routes::videos::snapshot,
        routes::projects::create_project,
        routes::projects::list_projects,
        routes::projects::get_project,
        routes::projects::update_project,
        routes::projects::delete_project,
        routes::projects::add_segment,
        routes::projects::update_segment,
        routes::projects::delete_segment,
        routes::projects::export_project,
        routes::operations::list_operations,
        routes::operations::get_operation,
        routes::operations::cancel_operation,
        routes::downloads::create_download,
        routes::downloads::list_downloads,
        routes::downloads::clear_downloads,
        routes::downloads::get_download,
        routes::downloads::cancel_download,
        routes::outputs::download_output,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::system::SystemInfoResponse,
        routes::system::ClearAllResponse,
        routes::videos::SnapshotRequest,
        routes::videos::SnapshotResponse,
        routes::projects::CreateProjectRequest,
        routes::projects::SegmentInput,
        routes::projects::UpdateProjectRequest,
        routes::projects::UpdateSegmentRequest,
        routes::downloads::ClearedResponse,
        crate::export::ExportRequest,
        crate::downloads::DownloadRequest,
        cs_core::MediaFile,
        cs_core::Project,
        cs_core::Segment,
        cs_core::Operation,
        cs_core::Download,
        cs_core::ErrorKind,
        cs_av::ToolInfo,
    ))
)]
pub struct ApiDoc;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(list))
}

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let upload_limit = usize::try_from(ctx.config.server.max_upload_bytes).unwrap_or(usize::MAX);

    let api = Router::new()
        // System
        .route("/system/info", get(routes::system::info))
        .route("/system/tools", get(routes::system::tools))
        .route("/system/clear-all", delete(routes::system::clear_all))
        // Videos
        .route("/videos", get(routes::videos::list_videos))
        .route(
            "/videos/upload",
            post(routes::videos::upload_video).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/videos/{id}",
            get(routes::videos::get_video).delete(routes::videos::delete_video),
        )
        .route("/videos/{id}/stream", get(routes::videos::stream_video))
        .route("/videos/{id}/snapshot", post(routes::videos::snapshot))
        // Projects
        .route(
            "/projects",
            get(routes::projects::list_projects).post(routes::projects::create_project),
        )
        .route(
            "/projects/{id}",
            get(routes::projects::get_project)
                .put(routes::projects::update_project)
                .delete(routes::projects::delete_project),
        )
        .route("/projects/{id}/segments", post(routes::projects::add_segment))
        .route(
            "/projects/{id}/segments/{segment_id}",
            put(routes::projects::update_segment).delete(routes::projects::delete_segment),
        )
        .route("/projects/{id}/export", post(routes::projects::export_project))
        // Operations
        .route("/operations", get(routes::operations::list_operations))
        .route("/operations/{id}", get(routes::operations::get_operation))
        .route(
            "/operations/{id}/cancel",
            post(routes::operations::cancel_operation),
        )
        // Downloads
        .route(
            "/downloads",
            get(routes::downloads::list_downloads)
                .post(routes::downloads::create_download)
                .delete(routes::downloads::clear_downloads),
        )
        .route("/downloads/{id}", get(routes::downloads::get_download))
        .route(
            "/downloads/{id}/cancel",
            post(routes::downloads::cancel_download),
        )
        // Outputs
        .route("/outputs/{filename}", get(routes::outputs::download_output));

    let static_dir = ctx.config.server.static_dir.clone();
    let cors = cors_layer(&ctx.config.server.cors_origins);

    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api", api)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    // Static file serving for a UI build.
    if let Some(dir) = static_dir {
        if dir.exists() {
            tracing::info!("Serving static files from {:?}", dir);
            let index_path = dir.join("index.html");
            app = app.fallback_service(
                tower_http::services::ServeDir::new(&dir)
                    .append_index_html_on_directories(true)
                    .not_found_service(tower_http::services::ServeFile::new(index_path)),
            );
        }
    }

    app
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use cs_av::{CutSettings, FfmpegTranscoder, ToolRegistry};
    use cs_core::config::Config;
    use cs_store::Store;

    use super::*;

    fn app(config: Config) -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let tools = Arc::new(ToolRegistry::default());
        let transcoder = Arc::new(FfmpegTranscoder::new(
            tools.clone(),
            CutSettings::from(&config.export),
        ));
        let ctx = AppContext::new(config, store, tools, transcoder).unwrap();
        (build_router(ctx), dir)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (app, _dir) = app(Config::default());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn openapi_lists_the_export_route() {
        let (app, _dir) = app(Config::default());
        let response = app
            .oneshot(Request::get("/api-docs/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert!(json["paths"]["/api/projects/{id}/export"]["post"].is_object());
        assert!(json["components"]["schemas"]["Operation"].is_object());
    }

    #[tokio::test]
    async fn empty_lists() {
        let (app, _dir) = app(Config::default());
        for uri in ["/api/videos", "/api/projects", "/api/operations", "/api/downloads"] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            assert_eq!(json_body(response).await, serde_json::json!([]), "{uri}");
        }
    }

    #[tokio::test]
    async fn bad_id_is_a_json_validation_error() {
        let (app, _dir) = app(Config::default());
        let response = app
            .oneshot(
                Request::get("/api/videos/xyz")
                    .header("x-request-id", "abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["code"], "validation");
        assert_eq!(json["request_id"], "abc");
    }

    #[tokio::test]
    async fn cors_restricts_to_configured_origins() {
        let mut config = Config::default();
        config.server.cors_origins = vec!["http://localhost:5173".into()];
        let (app, _dir) = app(config);

        let response = app
            .oneshot(
                Request::get("/health")
                    .header("origin", "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://localhost:5173"
        );
    }
}
