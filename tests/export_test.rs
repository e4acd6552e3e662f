//! Integration tests for the export orchestrator over HTTP.

mod common;

use std::time::Duration;

use serde_json::{json, Value};

use common::{FakeTranscoder, TestHarness};
use cs_core::config::Config;
use cs_core::{ErrorKind, OperationId, OperationStatus, Project, Segment};
use cs_store::queries::projects;

fn project_with(h: &TestHarness, ranges: &[(f64, Option<f64>)]) -> Project {
    let video = h.seed_video(b"source-bytes");
    let project = projects::create_project(&h.ctx.store, "Trip", video.id).unwrap();
    let segments = ranges
        .iter()
        .enumerate()
        .map(|(i, (start, end))| Segment::new(format!("part {}", i + 1), *start, *end))
        .collect();
    projects::update_project(&h.ctx.store, project.id, None, Some(segments)).unwrap()
}

async fn post_export(addr: std::net::SocketAddr, project: &Project, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}/api/projects/{}/export", project.id))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn accepted_id(resp: reqwest::Response) -> OperationId {
    assert_eq!(resp.status(), 202);
    let op: Value = resp.json().await.unwrap();
    assert_eq!(op["status"], "pending");
    assert_eq!(op["progress"], 0.0);
    op["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn single_segment_exports_one_file() {
    let (h, addr) = TestHarness::with_server().await;
    let project = project_with(&h, &[(5.0, Some(10.0))]);

    let resp = post_export(addr, &project, json!({"output_name": "clip", "format": "mkv"})).await;
    let op = h.wait_for_operation(accepted_id(resp).await).await;

    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(op.progress, 100.0);
    assert_eq!(op.output_files.len(), 1);
    assert!(op.output_files[0].ends_with("clip.mkv"));
    assert_eq!(h.output_names(), vec!["clip.mkv"]);

    let cuts = h.fake.cuts.lock().clone();
    assert_eq!(cuts.len(), 1);
    assert_eq!((cuts[0].start, cuts[0].end), (5.0, 10.0));
    assert!(h.fake.merges.lock().is_empty());

    // Work directory is gone once the export finished.
    assert!(h.temp_entries().is_empty());
}

#[tokio::test]
async fn default_merge_joins_in_project_order_and_drops_fragments() {
    let (h, addr) = TestHarness::with_server().await;
    let project = project_with(&h, &[(30.0, Some(40.0)), (0.0, Some(5.0)), (60.0, None)]);

    let resp = post_export(addr, &project, json!({"output_name": "reel"})).await;
    let op = h.wait_for_operation(accepted_id(resp).await).await;

    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(h.output_names(), vec!["reel.mp4"]);

    let cuts = h.fake.cuts.lock().clone();
    let starts: Vec<f64> = cuts.iter().map(|c| c.start).collect();
    assert_eq!(starts, vec![30.0, 0.0, 60.0]);
    // Open-ended segment falls back to the configured length.
    assert_eq!(cuts[2].end, 60.0 + Config::default().export.missing_end_secs);

    let merged = std::fs::read_to_string(h.ctx.store.outputs_dir().join("reel.mp4")).unwrap();
    assert!(merged.starts_with("cut 30-40|cut 0-5|"));

    assert!(h.temp_entries().is_empty());
}

#[tokio::test]
async fn separate_and_chapters_publish_every_artifact() {
    let (h, addr) = TestHarness::with_server().await;
    let project = project_with(&h, &[(0.0, Some(10.0)), (20.0, Some(25.0))]);

    let resp = post_export(
        addr,
        &project,
        json!({
            "output_name": "talk",
            "merge_segments": true,
            "export_separate": true,
            "export_chapters": true,
            "chapters_format": "json"
        }),
    )
    .await;
    let op = h.wait_for_operation(accepted_id(resp).await).await;

    assert_eq!(op.status, OperationStatus::Completed, "{:?}", op.error);
    assert_eq!(
        h.output_names(),
        vec![
            "talk_chapters.json",
            "talk_merged.mp4",
            "talk_segment_1.mp4",
            "talk_segment_2.mp4",
        ]
    );
    assert_eq!(op.output_files.len(), 4);

    let chapters: Value = serde_json::from_str(
        &std::fs::read_to_string(h.ctx.store.outputs_dir().join("talk_chapters.json")).unwrap(),
    )
    .unwrap();
    assert!(chapters.to_string().contains("part 2"));
}

#[tokio::test]
async fn subset_keeps_project_order() {
    let (h, addr) = TestHarness::with_server().await;
    let project = project_with(&h, &[(0.0, Some(1.0)), (10.0, Some(11.0)), (20.0, Some(21.0))]);
    let first = project.segments[0].id;
    let third = project.segments[2].id;

    let resp = post_export(
        addr,
        &project,
        json!({"output_name": "pick", "segment_ids": [third, first], "export_separate": true}),
    )
    .await;
    let op = h.wait_for_operation(accepted_id(resp).await).await;

    assert_eq!(op.status, OperationStatus::Completed);
    let starts: Vec<f64> = h.fake.cuts.lock().iter().map(|c| c.start).collect();
    assert_eq!(starts, vec![0.0, 20.0]);
    assert_eq!(h.output_names(), vec!["pick_segment_1.mp4", "pick_segment_2.mp4"]);
}

#[tokio::test]
async fn unknown_segment_is_rejected_up_front() {
    let (h, addr) = TestHarness::with_server().await;
    let project = project_with(&h, &[(0.0, Some(1.0))]);

    let resp = post_export(addr, &project, json!({"segment_ids": [cs_core::SegmentId::new()]})).await;
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "not_found");
    assert!(body["request_id"].is_string());
    assert!(h.ctx.operations.list().is_empty());
}

#[tokio::test]
async fn bad_chapter_format_is_a_validation_error() {
    let (h, addr) = TestHarness::with_server().await;
    let project = project_with(&h, &[(0.0, Some(1.0)), (2.0, Some(3.0))]);

    let resp = post_export(
        addr,
        &project,
        json!({"export_chapters": true, "chapters_format": "srt"}),
    )
    .await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn empty_project_fails_the_operation() {
    let (h, addr) = TestHarness::with_server().await;
    let project = project_with(&h, &[]);

    let resp = post_export(addr, &project, json!({})).await;
    let op = h.wait_for_operation(accepted_id(resp).await).await;

    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.error.as_deref(), Some("no segments to export"));
    assert_eq!(op.error_kind, Some(ErrorKind::Validation));
    assert!(h.output_names().is_empty());
}

#[tokio::test]
async fn missing_video_fails_the_operation() {
    let (h, addr) = TestHarness::with_server().await;
    let project = project_with(&h, &[(0.0, Some(1.0))]);
    cs_store::queries::videos::delete_video(&h.ctx.store, project.video_id).unwrap();

    let resp = post_export(addr, &project, json!({})).await;
    let op = h.wait_for_operation(accepted_id(resp).await).await;

    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.error_kind, Some(ErrorKind::NotFound));
    assert_eq!(op.error.as_deref(), Some("video not found"));
    assert!(h.fake.cuts.lock().is_empty());
}

#[tokio::test]
async fn failed_cut_publishes_nothing() {
    let fake = FakeTranscoder {
        fail_cuts: true,
        ..Default::default()
    };
    let (h, addr) = TestHarness::with_server_using(Config::default(), fake).await;
    let project = project_with(&h, &[(0.0, Some(1.0)), (5.0, Some(6.0))]);

    let resp = post_export(addr, &project, json!({"export_separate": true, "merge_segments": true})).await;
    let op = h.wait_for_operation(accepted_id(resp).await).await;

    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.error_kind, Some(ErrorKind::Pipeline));
    assert!(op.output_files.is_empty());
    assert!(h.output_names().is_empty());
    assert!(h.temp_entries().is_empty());
}

#[tokio::test]
async fn cancel_stops_a_running_export() {
    let fake = FakeTranscoder {
        cut_delay: Duration::from_secs(30),
        ..Default::default()
    };
    let (h, addr) = TestHarness::with_server_using(Config::default(), fake).await;
    let project = project_with(&h, &[(0.0, Some(1.0)), (5.0, Some(6.0))]);

    let id = accepted_id(post_export(addr, &project, json!({})).await).await;

    // Let the first cut start before cancelling.
    while h.fake.cuts.lock().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/api/operations/{id}/cancel"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let op = h.wait_for_operation(id).await;
    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(h.fake.cuts.lock().len(), 1);
    assert!(h.output_names().is_empty());

    // Cancelling a finished operation conflicts.
    let again = client
        .post(format!("http://{addr}/api/operations/{id}/cancel"))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);
}

#[tokio::test]
async fn saturated_pool_answers_busy() {
    let mut config = Config::default();
    config.jobs.max_concurrent = 1;
    config.jobs.max_queued = 0;
    let fake = FakeTranscoder {
        cut_delay: Duration::from_secs(30),
        ..Default::default()
    };
    let (h, addr) = TestHarness::with_server_using(config, fake).await;
    let project = project_with(&h, &[(0.0, Some(1.0))]);

    let first = accepted_id(post_export(addr, &project, json!({})).await).await;

    let resp = post_export(addr, &project, json!({})).await;
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "busy");
    assert_eq!(h.ctx.operations.list().len(), 1);

    h.ctx.operations.cancel(first).unwrap();
    h.wait_for_operation(first).await;
}

#[tokio::test]
async fn progress_never_goes_backwards() {
    let fake = FakeTranscoder {
        cut_delay: Duration::from_millis(20),
        ..Default::default()
    };
    let (h, addr) = TestHarness::with_server_using(Config::default(), fake).await;
    let project = project_with(&h, &[(0.0, Some(1.0)), (2.0, Some(3.0)), (4.0, Some(5.0))]);

    let id = accepted_id(post_export(addr, &project, json!({"export_separate": true})).await).await;

    let mut last = 0.0;
    loop {
        let op = h.ctx.operations.get(id).unwrap();
        assert!(op.progress >= last, "{} < {}", op.progress, last);
        last = op.progress;
        if op.status.is_terminal() {
            assert_eq!(op.status, OperationStatus::Completed);
            break;
        }
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    assert_eq!(last, 100.0);
}
