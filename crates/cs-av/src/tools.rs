//! External tool detection and management.
//!
//! The [`ToolRegistry`] discovers and caches the locations of the external
//! CLI tools cutsmith drives (ffmpeg, ffprobe, yt-dlp).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;

/// Default tool timeout: 6 hours. Long exports are legitimate.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6 * 3600);

/// Upper bound on a `--version` query.
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Known tool names that the registry manages.
pub const KNOWN_TOOLS: &[&str] = &["ffmpeg", "ffprobe", "yt-dlp"];

/// Configuration for a single external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Human-readable tool name (e.g. "ffmpeg").
    pub name: String,
    /// Resolved path to the executable.
    pub path: PathBuf,
    /// Maximum execution time before the tool is killed.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl ToolConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// A command for this tool, killed once [`timeout`](Self::timeout) passes.
    pub fn command(&self) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.path.clone());
        cmd.timeout(self.timeout);
        cmd
    }

    /// Like [`command`](Self::command) but bounded by `limit` as well.
    pub fn command_within(&self, limit: Duration) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.path.clone());
        cmd.timeout(self.timeout.min(limit));
        cmd
    }
}

/// Serde helpers to (de)serialize `Duration` as whole seconds.
mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of the version output, if available.
    pub version: Option<String>,
    #[schema(value_type = Option<String>)]
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
}

impl ToolRegistry {
    /// Discover tools by searching `PATH` (or using overrides from config).
    ///
    /// A configured path that exists wins; otherwise [`which::which`] is
    /// consulted. Tools that are not found are omitted from the registry.
    pub fn discover(tools_config: &cs_core::config::ToolsConfig) -> Self {
        let mut tools = HashMap::new();
        let timeout = Duration::from_secs(tools_config.timeout_secs.max(1));

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                "ffmpeg" => tools_config.ffmpeg_path.as_deref(),
                "ffprobe" => tools_config.ffprobe_path.as_deref(),
                "yt-dlp" => tools_config.ytdlp_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!(
                        "Configured path for {name} does not exist ({}); searching PATH",
                        p.display()
                    );
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            if let Some(path) = resolved {
                tools.insert(
                    name.to_string(),
                    ToolConfig {
                        name: name.to_string(),
                        path,
                        timeout,
                    },
                );
            }
        }

        Self { tools }
    }

    /// Build a registry from explicit paths, bypassing discovery.
    pub fn with_paths(entries: impl IntoIterator<Item = (&'static str, PathBuf)>) -> Self {
        let tools = entries
            .into_iter()
            .map(|(name, path)| (name.to_string(), ToolConfig::new(name, path)))
            .collect();
        Self { tools }
    }

    /// Return the [`ToolConfig`] for the given tool, or an
    /// [`cs_core::Error::Tool`] if it was not found during discovery.
    pub fn require(&self, name: &str) -> cs_core::Result<&ToolConfig> {
        self.tools.get(name).ok_or_else(|| {
            cs_core::Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Check all known tools and return availability information.
    ///
    /// Version queries run concurrently, each bounded by the tool's timeout
    /// and never longer than ten seconds. A tool that hangs is reported
    /// available with an unknown version.
    pub async fn check_all(&self) -> Vec<ToolInfo> {
        let checks = KNOWN_TOOLS.iter().map(|&name| async move {
            match self.tools.get(name) {
                Some(cfg) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(cfg).await,
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            }
        });
        futures::future::join_all(checks).await
    }
}

/// Run `<tool> --version` (or `-version` for ffmpeg/ffprobe) and return the
/// first line of stdout.
async fn detect_version(cfg: &ToolConfig) -> Option<String> {
    let version_arg = match cfg.name.as_str() {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    };

    match cfg.command_within(VERSION_TIMEOUT).arg(version_arg).execute().await {
        Ok(output) => output.stdout.lines().next().map(|s| s.trim().to_string()),
        Err(e) => {
            tracing::debug!(tool = %cfg.name, "Version query failed: {e}");
            None
        }
    }
}
