//! MediaFile records.

use cs_core::{MediaFile, Result, VideoId};

use crate::records;
use crate::Store;

pub fn save_video(store: &Store, video: &MediaFile) -> Result<()> {
    records::write_json(&records::record_path(&store.videos_dir(), video.id), video)
}

pub fn get_video(store: &Store, id: VideoId) -> Result<Option<MediaFile>> {
    records::read_json(&records::record_path(&store.videos_dir(), id))
}

/// All media files, newest first.
pub fn list_videos(store: &Store) -> Result<Vec<MediaFile>> {
    let mut videos: Vec<MediaFile> = records::list_json(&store.videos_dir())?;
    videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(videos)
}

/// Delete the record and its backing bytes. Projects that reference the
/// video are left as they are.
pub fn delete_video(store: &Store, id: VideoId) -> Result<bool> {
    let Some(video) = get_video(store, id)? else {
        return Ok(false);
    };
    match std::fs::remove_file(&video.path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(video_id = %id, path = %video.path.display(), "Media bytes already gone");
        }
        Err(e) => return Err(e.into()),
    }
    records::remove(&records::record_path(&store.videos_dir(), id))
}
