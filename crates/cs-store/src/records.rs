//! Atomic JSON record files.

use std::io::Write;
use std::path::{Path, PathBuf};

use cs_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Path of the record for `id` inside `dir`.
pub fn record_path(dir: &Path, id: impl std::fmt::Display) -> PathBuf {
    dir.join(format!("{id}.json"))
}

/// Serialize `value` to `path` by writing a sibling temp file and renaming
/// it into place, so readers see either the old or the new record.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Persistence(format!("no parent for {}", path.display())))?;
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::Persistence(format!("serialize {}: {e}", path.display())))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".record-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| Error::Persistence(format!("temp file in {}: {e}", dir.display())))?;
    tmp.write_all(&json)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Error::Persistence(format!("write {}: {e}", path.display())))?;
    tmp.persist(path)
        .map_err(|e| Error::Persistence(format!("rename into {}: {e}", path.display())))?;
    Ok(())
}

/// Load one record. A missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Persistence(format!("read {}: {e}", path.display()))),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::Persistence(format!("parse {}: {e}", path.display())))
}

/// Load every `*.json` record in `dir`. Unreadable records are skipped with
/// a warning rather than failing the whole listing.
pub fn list_json<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::Persistence(format!("list {}: {e}", dir.display())))?;

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_json(&path) {
            Ok(Some(record)) => out.push(record),
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping bad record"),
        }
    }
    Ok(out)
}

/// Delete a record file. Returns whether it existed.
pub fn remove(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Persistence(format!("delete {}: {e}", path.display()))),
    }
}
