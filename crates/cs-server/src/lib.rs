//! cs-server: HTTP API, export orchestration, and download management.
//!
//! - Axum API over projects, media files, operations and downloads
//! - Export orchestrator driving the [`cs_av::Transcode`] seam
//! - Bounded worker pool for background jobs
//! - Range-serving streamer for playback and published outputs
//! - Graceful shutdown via signal handling

pub mod context;
pub mod downloads;
pub mod error;
pub mod export;
pub mod jobs;
pub mod media;
pub mod middleware;
pub mod operations;
pub mod router;
pub mod routes;
pub mod streaming;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cs_av::{CutSettings, FfmpegTranscoder, ToolRegistry};
use cs_core::config::Config;
use cs_store::Store;

use crate::context::AppContext;

/// Build the production context: storage, discovered tools, ffmpeg-backed
/// transcoder.
pub fn build_context(config: Config) -> cs_core::Result<AppContext> {
    let base = config.storage.resolved_base_path();
    let store = Store::open(&base)?;
    tracing::info!("Storage at {}", base.display());

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    let transcoder = Arc::new(FfmpegTranscoder::new(
        tools.clone(),
        CutSettings::from(&config.export),
    ));
    AppContext::new(config, store, tools, transcoder)
}

/// Start the cutsmith server and run until a shutdown signal arrives.
pub async fn start(config: Config) -> cs_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| cs_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let ctx = build_context(config)?;

    for info in ctx.tool_status().await {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let max_age = Duration::from_secs(ctx.config.storage.cleanup_after_days * 24 * 60 * 60);
    if let Err(e) = ctx.store.cleanup_temp(max_age) {
        tracing::warn!("Temp cleanup failed: {e}");
    }
    if let Err(e) = downloads::recover_interrupted(&ctx.store) {
        tracing::warn!("Download recovery failed: {e}");
    }

    let app = router::build_router(ctx.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| cs_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Starting server on {addr}");

    let cancel = CancellationToken::new();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .map_err(|e| cs_core::Error::Internal(format!("Server error: {e}")))?;

    // Stop background work; exports end failed/cancelled, downloads cancelled.
    ctx.operations.cancel_all();
    ctx.downloads.cancel_all();

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for SIGINT, SIGTERM, or `cancel`.
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
