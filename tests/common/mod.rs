//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which opens a [`Store`] in a temp directory and
//! wires a full [`AppContext`] around [`FakeTranscoder`]. The
//! [`TestHarness::with_server`] constructors start Axum on a random port for
//! HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use cs_av::{CutJob, ProbeSummary, ProgressFn, ToolRegistry, Transcode};
use cs_core::config::Config;
use cs_core::{MediaFile, Operation, OperationId, StreamInfo, StreamKind, VideoId};
use cs_server::context::AppContext;
use cs_server::router::build_router;
use cs_store::queries::videos;
use cs_store::Store;

/// Duration every fake probe reports.
pub const FAKE_DURATION: f64 = 120.0;

/// In-process stand-in for ffmpeg.
///
/// A cut writes `cut <start>-<end>` into the output; a merge concatenates the
/// fragment bytes. Cuts wait `cut_delay` while honouring cancellation.
#[derive(Default)]
pub struct FakeTranscoder {
    pub cut_delay: Duration,
    pub fail_cuts: bool,
    pub cuts: Mutex<Vec<CutJob>>,
    pub merges: Mutex<Vec<Vec<PathBuf>>>,
}

#[async_trait]
impl Transcode for FakeTranscoder {
    async fn cut(
        &self,
        job: &CutJob,
        on_progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> cs_core::Result<()> {
        self.cuts.lock().push(job.clone());
        if let Some(report) = on_progress {
            report(0.5);
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(cs_core::Error::Cancelled("cut cancelled".into()));
            }
            _ = tokio::time::sleep(self.cut_delay) => {}
        }
        if self.fail_cuts {
            return Err(cs_core::Error::pipeline("cut", "ffmpeg exited with status 1"));
        }
        tokio::fs::write(&job.output, format!("cut {}-{}", job.start, job.end))
            .await
            .map_err(cs_core::Error::from)?;
        if let Some(report) = on_progress {
            report(1.0);
        }
        Ok(())
    }

    async fn merge(
        &self,
        fragments: &[PathBuf],
        output: &Path,
        _list_dir: &Path,
        _total_duration: f64,
        on_progress: Option<&ProgressFn>,
        _cancel: &CancellationToken,
    ) -> cs_core::Result<()> {
        self.merges.lock().push(fragments.to_vec());
        let mut joined = Vec::new();
        for frag in fragments {
            joined.extend(tokio::fs::read(frag).await.map_err(cs_core::Error::from)?);
            joined.push(b'|');
        }
        tokio::fs::write(output, joined)
            .await
            .map_err(cs_core::Error::from)?;
        if let Some(report) = on_progress {
            report(1.0);
        }
        Ok(())
    }

    async fn can_cut_losslessly(&self, _input: &Path, _start: f64, _end: f64) -> bool {
        true
    }

    async fn probe(&self, file: &Path) -> cs_core::Result<ProbeSummary> {
        let size = tokio::fs::metadata(file).await.ok().map(|m| m.len());
        Ok(ProbeSummary {
            duration: FAKE_DURATION,
            container: "mov".into(),
            size,
            streams: vec![StreamInfo {
                index: 0,
                kind: StreamKind::Video,
                codec: "h264".into(),
                width: Some(1920),
                height: Some(1080),
                channels: None,
                language: None,
            }],
            chapters: Vec::new(),
        })
    }

    async fn snapshot(
        &self,
        _input: &Path,
        output: &Path,
        _timestamp: f64,
        _quality: u8,
    ) -> cs_core::Result<()> {
        tokio::fs::write(output, b"\xff\xd8fake-jpeg")
            .await
            .map_err(cs_core::Error::from)
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`] backed by a
/// temporary storage root.
pub struct TestHarness {
    pub ctx: AppContext,
    pub fake: Arc<FakeTranscoder>,
    _dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new harness with default configuration.
    pub fn new() -> Self {
        Self::build(Config::default(), FakeTranscoder::default())
    }

    /// Create a harness with a custom configuration and fake transcoder.
    /// The storage base path is always redirected into a temp directory.
    pub fn build(mut config: Config, fake: FakeTranscoder) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        config.storage.base_path = dir.path().to_path_buf();
        let store = Store::open(dir.path()).expect("failed to open store");
        let fake = Arc::new(fake);
        let ctx = AppContext::new(
            config,
            store,
            Arc::new(ToolRegistry::default()),
            fake.clone(),
        )
        .expect("failed to build context");

        Self {
            ctx,
            fake,
            _dir: dir,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::with_server_using(Config::default(), FakeTranscoder::default()).await
    }

    /// Start an Axum server with custom config and transcoder on a random port.
    pub async fn with_server_using(config: Config, fake: FakeTranscoder) -> (Self, SocketAddr) {
        let harness = Self::build(config, fake);
        let app = build_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Place `bytes` in the uploads directory and register it as a video.
    pub fn seed_video(&self, bytes: &[u8]) -> MediaFile {
        let id = VideoId::new();
        let path = self.ctx.store.uploads_dir().join(format!("{id}.mp4"));
        std::fs::write(&path, bytes).expect("failed to write video bytes");
        let video = MediaFile {
            id,
            file_name: "clip.mp4".into(),
            path,
            size: bytes.len() as u64,
            duration: FAKE_DURATION,
            container: "mov".into(),
            streams: Vec::new(),
            chapters: Vec::new(),
            original_url: None,
            created_at: chrono::Utc::now(),
        };
        videos::save_video(&self.ctx.store, &video).expect("failed to save video");
        video
    }

    /// Poll an operation until it reaches a terminal state.
    pub async fn wait_for_operation(&self, id: OperationId) -> Operation {
        for _ in 0..500 {
            if let Some(op) = self.ctx.operations.get(id) {
                if op.status.is_terminal() {
                    return op;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("operation {id} did not finish");
    }

    /// File names currently in `outputs/`, sorted.
    pub fn output_names(&self) -> Vec<String> {
        list_names(&self.ctx.store.outputs_dir())
    }

    /// Entries currently in `temp/`, sorted.
    pub fn temp_entries(&self) -> Vec<String> {
        list_names(&self.ctx.store.temp_dir())
    }
}

fn list_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
