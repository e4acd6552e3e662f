//! Project records and their embedded segments.
//!
//! Every mutation loads the whole project, applies the change, validates
//! the segment list, and rewrites the record atomically.

use cs_core::{Error, Project, ProjectId, Result, Segment, SegmentId, VideoId};

use crate::queries::videos;
use crate::records;
use crate::Store;

fn path(store: &Store, id: ProjectId) -> std::path::PathBuf {
    records::record_path(&store.projects_dir(), id)
}

/// Create a project for an existing video.
pub fn create_project(store: &Store, name: &str, video_id: VideoId) -> Result<Project> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("project name must not be empty".into()));
    }
    if videos::get_video(store, video_id)?.is_none() {
        return Err(Error::not_found("video", video_id));
    }
    let project = Project::new(name, video_id);
    records::write_json(&path(store, project.id), &project)?;
    tracing::info!(project_id = %project.id, %video_id, "Project created");
    Ok(project)
}

pub fn get_project(store: &Store, id: ProjectId) -> Result<Option<Project>> {
    records::read_json(&path(store, id))
}

/// Like [`get_project`] but missing is an error.
pub fn require_project(store: &Store, id: ProjectId) -> Result<Project> {
    get_project(store, id)?.ok_or_else(|| Error::not_found("project", id))
}

/// All projects, newest first.
pub fn list_projects(store: &Store) -> Result<Vec<Project>> {
    let mut projects: Vec<Project> = records::list_json(&store.projects_dir())?;
    projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(projects)
}

/// Apply `f` to the stored project and persist the result.
///
/// The change is discarded if `f` fails or the resulting segment list is
/// invalid.
pub fn modify_project<R>(
    store: &Store,
    id: ProjectId,
    f: impl FnOnce(&mut Project) -> Result<R>,
) -> Result<(Project, R)> {
    let _guard = store.write_lock();
    let mut project = require_project(store, id)?;
    let out = f(&mut project)?;
    project.validate_segments()?;
    project.touch();
    records::write_json(&path(store, id), &project)?;
    Ok((project, out))
}

/// Replace the name and/or the whole segment list.
pub fn update_project(
    store: &Store,
    id: ProjectId,
    name: Option<String>,
    segments: Option<Vec<Segment>>,
) -> Result<Project> {
    let (project, ()) = modify_project(store, id, |p| {
        if let Some(name) = name {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Validation("project name must not be empty".into()));
            }
            p.name = name.to_string();
        }
        if let Some(segments) = segments {
            p.segments = segments;
        }
        Ok(())
    })?;
    Ok(project)
}

pub fn delete_project(store: &Store, id: ProjectId) -> Result<bool> {
    let _guard = store.write_lock();
    records::remove(&path(store, id))
}

/// Append a segment to the end of the project's list.
pub fn add_segment(store: &Store, project_id: ProjectId, segment: Segment) -> Result<Segment> {
    let (_, seg) = modify_project(store, project_id, |p| {
        if p.segment(segment.id).is_some() {
            return Err(Error::Conflict(format!("segment {} already exists", segment.id)));
        }
        p.segments.push(segment.clone());
        Ok(segment)
    })?;
    Ok(seg)
}

/// Edit one segment in place; its position in the list is kept.
pub fn update_segment(
    store: &Store,
    project_id: ProjectId,
    segment_id: SegmentId,
    f: impl FnOnce(&mut Segment),
) -> Result<Segment> {
    let (_, seg) = modify_project(store, project_id, |p| {
        let seg = p
            .segments
            .iter_mut()
            .find(|s| s.id == segment_id)
            .ok_or_else(|| Error::not_found("segment", segment_id))?;
        f(seg);
        Ok(seg.clone())
    })?;
    Ok(seg)
}

pub fn delete_segment(store: &Store, project_id: ProjectId, segment_id: SegmentId) -> Result<()> {
    modify_project(store, project_id, |p| {
        let before = p.segments.len();
        p.segments.retain(|s| s.id != segment_id);
        if p.segments.len() == before {
            return Err(Error::not_found("segment", segment_id));
        }
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::videos::{save_video, tests::sample_video};

    fn setup() -> (tempfile::TempDir, Store, VideoId) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let video = sample_video(&store, "v.mp4");
        save_video(&store, &video).unwrap();
        (dir, store, video.id)
    }

    #[test]
    fn create_requires_video() {
        let (_dir, store, _) = setup();
        let err = create_project(&store, "p", VideoId::new()).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        let err = create_project(&store, "  ", VideoId::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn crud() {
        let (_dir, store, video_id) = setup();
        let p = create_project(&store, "Trip", video_id).unwrap();
        assert_eq!(require_project(&store, p.id).unwrap().name, "Trip");
        assert_eq!(list_projects(&store).unwrap().len(), 1);

        let updated = update_project(&store, p.id, Some("Holiday".into()), None).unwrap();
        assert_eq!(updated.name, "Holiday");
        assert!(updated.updated_at >= p.updated_at);

        assert!(delete_project(&store, p.id).unwrap());
        assert!(get_project(&store, p.id).unwrap().is_none());
        assert!(matches!(
            require_project(&store, p.id).unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn segment_lifecycle_keeps_order() {
        let (_dir, store, video_id) = setup();
        let p = create_project(&store, "p", video_id).unwrap();

        let late = add_segment(&store, p.id, Segment::new("late", 20.0, Some(25.0))).unwrap();
        let early = add_segment(&store, p.id, Segment::new("early", 0.0, Some(5.0))).unwrap();

        let edited = update_segment(&store, p.id, late.id, |s| s.name = "renamed".into()).unwrap();
        assert_eq!(edited.name, "renamed");

        let stored = require_project(&store, p.id).unwrap();
        let ids: Vec<_> = stored.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, [late.id, early.id]);

        delete_segment(&store, p.id, late.id).unwrap();
        let err = delete_segment(&store, p.id, late.id).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(require_project(&store, p.id).unwrap().segments.len(), 1);
    }

    #[test]
    fn invalid_segment_is_not_persisted() {
        let (_dir, store, video_id) = setup();
        let p = create_project(&store, "p", video_id).unwrap();
        let seg = add_segment(&store, p.id, Segment::new("a", 1.0, Some(2.0))).unwrap();

        let err = update_segment(&store, p.id, seg.id, |s| s.end = Some(0.5)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(require_project(&store, p.id).unwrap().segments[0].end, Some(2.0));

        let err = add_segment(&store, p.id, Segment::new("neg", -1.0, None)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = add_segment(&store, p.id, seg.clone()).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
