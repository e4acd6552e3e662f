//! Download records. Unlike operations these survive restarts.

use cs_core::{Download, DownloadId, Result};

use crate::records;
use crate::Store;

fn path(store: &Store, id: DownloadId) -> std::path::PathBuf {
    records::record_path(&store.downloads_dir(), id)
}

pub fn save_download(store: &Store, download: &Download) -> Result<()> {
    records::write_json(&path(store, download.id), download)
}

pub fn get_download(store: &Store, id: DownloadId) -> Result<Option<Download>> {
    records::read_json(&path(store, id))
}

/// All downloads, newest first.
pub fn list_downloads(store: &Store) -> Result<Vec<Download>> {
    let mut downloads: Vec<Download> = records::list_json(&store.downloads_dir())?;
    downloads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(downloads)
}

/// Delete every record in a terminal state. Returns how many were removed.
pub fn clear_finished_downloads(store: &Store) -> Result<usize> {
    let mut removed = 0;
    for d in list_downloads(store)? {
        if d.status.is_terminal() && records::remove(&path(store, d.id))? {
            removed += 1;
        }
    }
    Ok(removed)
}
