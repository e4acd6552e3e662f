//! Application context shared by every handler and background task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use cs_av::{ToolInfo, ToolRegistry, Transcode};
use cs_core::config::Config;
use cs_store::Store;

use crate::downloads::DownloadTokens;
use crate::jobs::WorkerPool;
use crate::operations::OperationRegistry;

/// Application context shared by all request handlers (via Axum state).
///
/// This is cheaply cloneable because it only holds `Arc`s.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable configuration snapshot.
    pub config: Arc<Config>,
    /// Record persistence and directory layout.
    pub store: Arc<Store>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    tool_status: Arc<OnceCell<Vec<ToolInfo>>>,
    /// Media operations (ffmpeg in production).
    pub transcoder: Arc<dyn Transcode>,
    /// In-memory export operations.
    pub operations: Arc<OperationRegistry>,
    /// Cancel tokens for running downloads.
    pub downloads: Arc<DownloadTokens>,
    /// Bounded pool for exports and downloads.
    pub pool: WorkerPool,
    /// Client for direct media downloads.
    pub http: reqwest::Client,
}

impl AppContext {
    pub fn new(
        config: Config,
        store: Store,
        tools: Arc<ToolRegistry>,
        transcoder: Arc<dyn Transcode>,
    ) -> cs_core::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cutsmith/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.download.http_timeout_secs.max(1)))
            .build()
            .map_err(|e| cs_core::Error::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            pool: WorkerPool::new(&config.jobs),
            config: Arc::new(config),
            store: Arc::new(store),
            tools,
            tool_status: Arc::new(OnceCell::new()),
            transcoder,
            operations: Arc::new(OperationRegistry::new()),
            downloads: Arc::new(DownloadTokens::default()),
            http,
        })
    }

    /// Availability and versions of the external tools.
    ///
    /// Versions are queried on first use and cached for the life of the
    /// process; tools installed later need a restart to show up.
    pub async fn tool_status(&self) -> Vec<ToolInfo> {
        self.tool_status
            .get_or_init(|| self.tools.check_all())
            .await
            .clone()
    }

    /// Run blocking store work (file I/O under the store's write lock) on
    /// the blocking pool instead of an async worker.
    pub async fn with_store<T, F>(&self, f: F) -> cs_core::Result<T>
    where
        F: FnOnce(&Store) -> cs_core::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| cs_core::Error::Internal(format!("spawn_blocking join error: {e}")))?
    }
}
