//! Integration tests for the REST surface: health, system, videos, projects.

mod common;

use std::time::Duration;

use serde_json::{json, Value};

use cs_core::config::Config;
use cs_core::{Segment, StreamInfo, StreamKind};
use cs_store::queries::{projects, videos};

use common::{FakeTranscoder, TestHarness, FAKE_DURATION};

#[tokio::test]
async fn health_and_openapi() {
    let (_h, addr) = TestHarness::with_server().await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let doc: Value = reqwest::get(format!("http://{addr}/api-docs/openapi.json"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(doc["paths"]["/api/projects/{id}/export"].is_object());
    assert!(doc["paths"]["/api/downloads"].is_object());
}

#[tokio::test]
async fn incoming_request_id_is_echoed_in_errors() {
    let (_h, addr) = TestHarness::with_server().await;

    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/projects/not-a-uuid"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.headers()["x-request-id"], "req-42");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "validation");
    assert_eq!(body["request_id"], "req-42");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn system_info_reports_pool_and_tools() {
    let (_h, addr) = TestHarness::with_server().await;

    let info: Value = reqwest::get(format!("http://{addr}/api/system/info"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["jobs_in_flight"], 0);
    assert_eq!(info["jobs_capacity"], 18);
    // Empty registry: every known tool is reported missing.
    let tools = info["tools"].as_array().unwrap();
    assert!(!tools.is_empty());
    assert!(tools.iter().all(|t| t["available"] == false));
}

#[tokio::test]
async fn upload_probe_and_delete_video() {
    let (h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let part = reqwest::multipart::Part::bytes(b"not really a video".to_vec()).file_name("My Clip.MOV");
    let form = reqwest::multipart::Form::new().part("file", part);
    let resp = client
        .post(format!("http://{addr}/api/videos/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let video: Value = resp.json().await.unwrap();
    assert_eq!(video["file_name"], "My Clip.MOV");
    assert_eq!(video["duration"], FAKE_DURATION);
    assert_eq!(video["size"], 18);
    let id = video["id"].as_str().unwrap().to_string();

    let stored = std::path::PathBuf::from(video["path"].as_str().unwrap());
    assert!(stored.starts_with(h.ctx.store.uploads_dir()));
    assert_eq!(stored.extension().unwrap(), "mov");

    let listed: Vec<Value> = client
        .get(format!("http://{addr}/api/videos"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    let resp = client
        .delete(format!("http://{addr}/api/videos/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    assert!(!stored.exists());

    let resp = client
        .get(format!("http://{addr}/api/videos/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn upload_without_file_field_is_rejected() {
    let (_h, addr) = TestHarness::with_server().await;

    let form = reqwest::multipart::Form::new().text("note", "hello");
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/videos/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn snapshot_validates_and_writes_frame() {
    let (h, addr) = TestHarness::with_server().await;
    let video = h.seed_video(b"bytes");
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/videos/{}/snapshot", video.id);

    let resp = client.post(&url).json(&json!({"timestamp": 12.5})).send().await.unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    let path = std::path::PathBuf::from(body["path"].as_str().unwrap());
    assert!(path.starts_with(h.ctx.store.screenshots_dir()));
    assert!(path.exists());

    let beyond = client
        .post(&url)
        .json(&json!({"timestamp": FAKE_DURATION + 1.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(beyond.status(), 400);

    let bad_quality = client
        .post(&url)
        .json(&json!({"timestamp": 1.0, "quality": 40}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_quality.status(), 400);
}

#[tokio::test]
async fn snapshot_needs_a_video_stream() {
    let (h, addr) = TestHarness::with_server().await;
    let mut audio = h.seed_video(b"bytes");
    audio.streams = vec![StreamInfo {
        index: 0,
        kind: StreamKind::Audio,
        codec: "aac".into(),
        width: None,
        height: None,
        channels: Some(2),
        language: None,
    }];
    videos::save_video(&h.ctx.store, &audio).unwrap();

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/videos/{}/snapshot", audio.id))
        .json(&json!({"timestamp": 1.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "validation");
    assert!(body["error"].as_str().unwrap().contains("no video stream"));
    assert!(list_dir(&h.ctx.store.screenshots_dir()).is_empty());
}

fn list_dir(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}

#[tokio::test]
async fn project_and_segment_lifecycle() {
    let (h, addr) = TestHarness::with_server().await;
    let video = h.seed_video(b"bytes");
    let client = reqwest::Client::new();
    let base = format!("http://{addr}/api/projects");

    let resp = client
        .post(&base)
        .json(&json!({"name": "Holiday", "video_id": video.id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let project: Value = resp.json().await.unwrap();
    let pid = project["id"].as_str().unwrap().to_string();
    assert_eq!(project["segments"], json!([]));

    // Append two segments.
    let resp = client
        .post(format!("{base}/{pid}/segments"))
        .json(&json!({"name": "intro", "start": 0.0, "end": 4.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let intro: Value = resp.json().await.unwrap();
    let intro_id = intro["id"].as_str().unwrap().to_string();

    client
        .post(format!("{base}/{pid}/segments"))
        .json(&json!({"name": "outro", "start": 50.0}))
        .send()
        .await
        .unwrap();

    // Invalid range.
    let resp = client
        .post(format!("{base}/{pid}/segments"))
        .json(&json!({"start": 9.0, "end": 3.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Patch: rename and clear the end.
    let resp = client
        .put(format!("{base}/{pid}/segments/{intro_id}"))
        .json(&json!({"name": "opening", "end": null}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let patched: Value = resp.json().await.unwrap();
    assert_eq!(patched["name"], "opening");
    assert!(patched.get("end").is_none());

    // A patch that breaks the range is refused and leaves the record alone.
    let resp = client
        .put(format!("{base}/{pid}/segments/{intro_id}"))
        .json(&json!({"start": -1.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let project: Value = client
        .get(format!("{base}/{pid}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = project["segments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["opening", "outro"]);
    assert_eq!(project["segments"][0]["start"], 0.0);

    // Replace the whole list with a reordered one.
    let resp = client
        .put(format!("{base}/{pid}"))
        .json(&json!({
            "name": "Holiday cut",
            "segments": [
                {"name": "b", "start": 10.0, "end": 12.0},
                {"name": "a", "start": 1.0, "end": 2.0}
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let project: Value = resp.json().await.unwrap();
    assert_eq!(project["name"], "Holiday cut");
    assert_eq!(project["segments"][0]["name"], "b");

    // Delete a segment that no longer exists.
    let resp = client
        .delete(format!("{base}/{pid}/segments/{intro_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client.delete(format!("{base}/{pid}")).send().await.unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client.get(format!("{base}/{pid}")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn project_needs_existing_video() {
    let (_h, addr) = TestHarness::with_server().await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/projects"))
        .json(&json!({"name": "x", "video_id": cs_core::VideoId::new()}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "video not found");
}

#[tokio::test]
async fn unknown_operation_is_not_found() {
    let (_h, addr) = TestHarness::with_server().await;

    let resp = reqwest::get(format!(
        "http://{addr}/api/operations/{}",
        cs_core::OperationId::new()
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn clear_all_wipes_media_projects_and_outputs() {
    let (h, addr) = TestHarness::with_server().await;
    let video = h.seed_video(b"bytes");
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/projects"))
        .json(&json!({"name": "Doomed", "video_id": video.id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    std::fs::write(h.ctx.store.outputs_dir().join("old.mp4"), b"x").unwrap();
    std::fs::write(h.ctx.store.download_files_dir().join("half.part"), b"x").unwrap();
    std::fs::write(h.ctx.store.temp_dir().join("frag.mp4"), b"x").unwrap();

    let resp = client
        .delete(format!("http://{addr}/api/system/clear-all"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["message"],
        "All videos, downloads, projects, and history have been cleared"
    );
    assert!(body["removed"].as_u64().unwrap() >= 6);

    let videos: Value = client
        .get(format!("http://{addr}/api/videos"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(videos, json!([]));
    let projects: Value = client
        .get(format!("http://{addr}/api/projects"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(projects, json!([]));
    assert!(h.output_names().is_empty());
    assert!(h.temp_entries().is_empty());
    assert!(!video.path.exists());
    assert!(h.ctx.store.download_files_dir().is_dir());
}

#[tokio::test]
async fn clear_all_refuses_while_a_job_runs() {
    let fake = FakeTranscoder {
        cut_delay: Duration::from_secs(30),
        ..Default::default()
    };
    let (h, addr) = TestHarness::with_server_using(Config::default(), fake).await;
    let video = h.seed_video(b"bytes");
    let client = reqwest::Client::new();

    let project = projects::create_project(&h.ctx.store, "Busy", video.id).unwrap();
    projects::update_project(
        &h.ctx.store,
        project.id,
        None,
        Some(vec![Segment::new("only", 0.0, Some(1.0))]),
    )
    .unwrap();
    let resp = client
        .post(format!("http://{addr}/api/projects/{}/export", project.id))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let op: Value = resp.json().await.unwrap();
    let op_id: cs_core::OperationId = op["id"].as_str().unwrap().parse().unwrap();

    while h.fake.cuts.lock().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let resp = client
        .delete(format!("http://{addr}/api/system/clear-all"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "conflict");
    assert!(video.path.exists());

    h.ctx.operations.cancel(op_id).unwrap();
    h.wait_for_operation(op_id).await;
    while h.ctx.pool.in_flight() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let resp = client
        .delete(format!("http://{addr}/api/system/clear-all"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["operations_cleared"], 1);
    assert!(h.ctx.operations.list().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_segment_appends_are_all_kept() {
    let (h, addr) = TestHarness::with_server().await;
    let video = h.seed_video(b"bytes");
    let client = reqwest::Client::new();

    let project: Value = client
        .post(format!("http://{addr}/api/projects"))
        .json(&json!({"name": "Race", "video_id": video.id}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let url = format!(
        "http://{addr}/api/projects/{}/segments",
        project["id"].as_str().unwrap()
    );

    let mut tasks = Vec::new();
    for i in 0..20 {
        let client = client.clone();
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            client
                .post(url)
                .json(&json!({"name": format!("s{i}"), "start": i as f64}))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), 201);
    }

    let project: Value = client
        .get(format!("http://{addr}/api/projects/{}", project["id"].as_str().unwrap()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(project["segments"].as_array().unwrap().len(), 20);
}
