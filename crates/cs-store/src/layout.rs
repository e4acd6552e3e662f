//! Storage directory layout and housekeeping.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use cs_core::{Error, Result};
use parking_lot::Mutex;

const SUBDIRS: &[&str] = &[
    "uploads",
    "projects",
    "videos",
    "downloads",
    "downloads/files",
    "outputs",
    "temp",
    "screenshots",
];

/// Handle to the storage directory tree.
///
/// Read-modify-write sequences on records go through [`Store::write_lock`]
/// so concurrent handlers never lose each other's updates.
#[derive(Debug)]
pub struct Store {
    base: PathBuf,
    write_lock: Mutex<()>,
}

impl Store {
    /// Create (if needed) every directory under `base` and return a handle.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        for sub in SUBDIRS {
            let dir = base.join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| {
                Error::Persistence(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        tracing::debug!(base = %base.display(), "Storage initialised");
        Ok(Self {
            base,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.base.join("uploads")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.base.join("projects")
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.base.join("videos")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.base.join("downloads")
    }

    /// Where in-flight download bytes land before ingest.
    pub fn download_files_dir(&self) -> PathBuf {
        self.base.join("downloads").join("files")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.base.join("outputs")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.base.join("temp")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.base.join("screenshots")
    }

    pub(crate) fn write_lock(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Resolve a published output by bare file name.
    ///
    /// Rejects anything that is not a single normal path component, so
    /// `..`, absolute paths and separators never escape `outputs/`.
    pub fn output_path(&self, file_name: &str) -> Result<PathBuf> {
        if !is_plain_file_name(file_name) {
            return Err(Error::Validation(format!("invalid file name: {file_name}")));
        }
        Ok(self.outputs_dir().join(file_name))
    }

    /// Remove entries in `temp/` whose modification time is older than
    /// `older_than`. Returns how many entries were removed.
    pub fn cleanup_temp(&self, older_than: Duration) -> Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        for entry in std::fs::read_dir(self.temp_dir())? {
            let entry = entry?;
            let path = entry.path();
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot stat temp entry");
                    continue;
                }
            };
            if modified > cutoff {
                continue;
            }
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot remove temp entry")
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Cleaned up stale temp entries");
        }
        Ok(removed)
    }
    /// Remove every video, project, download, output, screenshot and temp
    /// entry, leaving the empty directory skeleton behind. Returns how many
    /// entries were removed.
    ///
    /// Callers make sure no job is writing into the tree first.
    pub fn clear_everything(&self) -> Result<usize> {
        let _guard = self.write_lock();
        let mut removed = 0;

        for sub in SUBDIRS {
            let dir = self.base.join(sub);
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() && is_layout_dir(&self.base, &path) {
                    continue;
                }
                let result = if path.is_dir() {
                    std::fs::remove_dir_all(&path)
                } else {
                    std::fs::remove_file(&path)
                };
                result.map_err(|e| {
                    Error::Persistence(format!("cannot remove {}: {e}", path.display()))
                })?;
                removed += 1;
            }
        }

        tracing::warn!(removed, "Storage cleared");
        Ok(removed)
    }
}

fn is_layout_dir(base: &Path, path: &Path) -> bool {
    SUBDIRS.iter().any(|sub| base.join(sub) == path)
}

/// Move `from` to `to`, falling back to copy and remove when a rename is
/// not possible (different filesystems).
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|e| {
        Error::Persistence(format!("cannot move {} to {}: {e}", from.display(), to.display()))
    })?;
    if let Err(e) = std::fs::remove_file(from) {
        tracing::warn!(path = %from.display(), error = %e, "Cannot remove moved source");
    }
    Ok(())
}

/// True when `name` is a single normal file name component.
pub fn is_plain_file_name(name: &str) -> bool {
    use std::path::Component;

    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
