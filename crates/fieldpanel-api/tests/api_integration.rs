use std::fs;
use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, HeaderValue};
use axum_test::TestServer;
use base64::{engine::general_purpose::STANDARD, Engine};
use fieldpanel_api::{create_router, AppState, PanelEvent};
use fieldpanel_core::{Settings, TrialId};
use fieldpanel_runtime::memory::InMemoryRuntime;
use fieldpanel_runtime::{ContainerInfo, ContainerRuntime, ProcessTable};
use regex::Regex;
use serde_json::{json, Value};
use tempfile::TempDir;

struct NoProcesses;

impl ProcessTable for NoProcesses {
    fn find(&self, _pattern: &Regex) -> Vec<u32> {
        Vec::new()
    }

    fn terminate(&self, _pid: u32) -> bool {
        false
    }
}

struct Harness {
    server: TestServer,
    state: AppState,
    runtime: Arc<InMemoryRuntime>,
    workspace: TempDir,
}

fn settings(root: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.workspace.root = root.to_path_buf();
    settings.server.frontend_dir = Some(root.join("frontend"));
    settings
}

fn harness() -> Harness {
    let workspace = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let state = AppState::new(
        settings(workspace.path()),
        Some(runtime.clone() as Arc<dyn ContainerRuntime>),
        Arc::new(NoProcesses),
    )
    .unwrap();
    let server = TestServer::new(create_router(state.clone())).unwrap();
    Harness {
        server,
        state,
        runtime,
        workspace,
    }
}

fn basic(user: &str, pass: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))).unwrap()
}

fn auth() -> HeaderValue {
    basic("bakin", "ozhugu")
}

fn write_samples(root: &std::path::Path, trial: u32, field: &str) {
    let dir = root
        .join("src/sampling/data/missions")
        .join(format!("trial_{trial}"))
        .join(field);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(format!("{field}_samples.csv")),
        "x,y,value\n0.0,0.0,1.5\n1.0,0.5,2.5\n",
    )
    .unwrap();
}

#[tokio::test]
async fn health_is_public() {
    let h = harness();
    let resp = h.server.get("/api/health").await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["status"], "online");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn protected_routes_challenge_without_credentials() {
    let h = harness();
    let resp = h.server.get("/api/status").await;
    assert_eq!(resp.status_code(), 401);
    assert_eq!(
        resp.headers().get("www-authenticate").and_then(|v| v.to_str().ok()),
        Some("Basic")
    );

    let resp = h
        .server
        .get("/api/status")
        .add_header(AUTHORIZATION, basic("bakin", "nope"))
        .await;
    assert_eq!(resp.status_code(), 401);
    let body: Value = resp.json();
    assert_eq!(body["detail"], "Invalid credentials");
}

#[tokio::test]
async fn login_checks_credentials_without_challenge() {
    let h = harness();
    let resp = h
        .server
        .post("/api/login")
        .json(&json!({"username": "bakin", "password": "ozhugu"}))
        .await;
    assert_eq!(resp.status_code(), 200);
    assert_eq!(resp.json::<Value>(), json!({"success": true, "username": "bakin"}));

    let resp = h
        .server
        .post("/api/login")
        .json(&json!({"username": "bakin", "password": "wrong"}))
        .await;
    assert_eq!(resp.status_code(), 401);
    assert!(resp.headers().get("www-authenticate").is_none());
}

#[tokio::test]
async fn landing_redirects_to_login_and_pages_fall_back() {
    let h = harness();
    let resp = h.server.get("/").await;
    assert_eq!(resp.status_code(), 307);
    assert_eq!(
        resp.headers().get("location").and_then(|v| v.to_str().ok()),
        Some("/login")
    );

    let resp = h.server.get("/login").await;
    assert_eq!(resp.status_code(), 200);
    assert!(resp.text().contains("/api/login"));
}

#[tokio::test]
async fn dashboard_template_is_rendered() {
    let h = harness();
    let templates = h.workspace.path().join("frontend/templates");
    fs::create_dir_all(&templates).unwrap();
    fs::write(templates.join("dashboard.html"), "<p>Hello {{ username }}</p>").unwrap();

    let resp = h.server.get("/dashboard").await;
    assert_eq!(resp.status_code(), 200);
    assert_eq!(resp.text(), "<p>Hello user</p>");
}

#[tokio::test]
async fn status_reports_containers_and_host() {
    let h = harness();
    let resp = h.server.get("/api/status").add_header(AUTHORIZATION, auth()).await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["containers"], json!([]));
    assert_eq!(body["is_production"], false);
    assert_eq!(body["host_pc_connected"], true);
    assert!(body["system"]["memory_total_gb"].is_number());
}

#[tokio::test]
async fn trial_lifecycle_publishes_events() {
    let h = harness();
    let mut events = h.state.events.subscribe();

    let resp = h
        .server
        .post("/api/trial/start/3")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["message"], "Trial 3 started");
    assert_eq!(body["result"]["vnc_port"], 6083);
    assert!(h.runtime.container("aquatic-trial-3").is_some());
    assert_eq!(
        events.recv().await.unwrap(),
        PanelEvent::TrialStarted {
            trial_id: TrialId(3),
            batch_status: None
        }
    );

    let resp = h
        .server
        .get("/api/containers")
        .add_header(AUTHORIZATION, auth())
        .await;
    let containers: Value = resp.json();
    assert_eq!(containers[0]["trial_id"], "3");
    assert_eq!(containers[0]["status"], "running");

    let resp = h
        .server
        .post("/api/trial/stop/3")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 200);
    assert_eq!(
        h.runtime.container("aquatic-trial-3").unwrap().status,
        "exited"
    );
    assert_eq!(events.recv().await.unwrap().name(), "trial_stopped");

    let resp = h
        .server
        .delete("/api/trial/3")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 200);
    assert!(h.runtime.container("aquatic-trial-3").is_none());
    assert_eq!(events.recv().await.unwrap().name(), "trial_removed");
}

#[tokio::test]
async fn unknown_trial_is_not_found() {
    let h = harness();
    for resp in [
        h.server
            .post("/api/trial/stop/42")
            .add_header(AUTHORIZATION, auth())
            .await,
        h.server
            .delete("/api/trial/42")
            .add_header(AUTHORIZATION, auth())
            .await,
        h.server
            .get("/api/logs/42")
            .add_header(AUTHORIZATION, auth())
            .await,
    ] {
        assert_eq!(resp.status_code(), 404);
        assert_eq!(resp.json::<Value>()["detail"], "Trial 42 not found");
    }
}

#[tokio::test]
async fn trial_logs_honour_line_limit() {
    let h = harness();
    h.runtime.insert(ContainerInfo {
        id: "abc".into(),
        name: "aquatic-trial-5".into(),
        status: "running".into(),
        created: "2026-01-01T00:00:00Z".into(),
        ports: Vec::new(),
    });
    h.runtime
        .set_logs("aquatic-trial-5", "one\ntwo\nWaypoint 1/4: go\n");

    let resp = h
        .server
        .get("/api/logs/5")
        .add_query_param("lines", 1)
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 200);
    assert_eq!(
        resp.json::<Value>(),
        json!({"trial_id": 5, "logs": "Waypoint 1/4: go"})
    );
}

#[tokio::test]
async fn without_runtime_trial_start_fails() {
    let workspace = tempfile::tempdir().unwrap();
    let state = AppState::new(settings(workspace.path()), None, Arc::new(NoProcesses)).unwrap();
    let server = TestServer::new(create_router(state)).unwrap();

    let resp = server
        .post("/api/trial/start/1")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 500);
    assert_eq!(
        resp.json::<Value>()["detail"],
        "Docker not available. Make sure Docker is running."
    );

    let resp = server.get("/api/status").add_header(AUTHORIZATION, auth()).await;
    assert_eq!(resp.json::<Value>()["host_pc_connected"], false);
}

#[tokio::test]
async fn batch_start_fills_capacity() {
    let h = harness();
    let resp = h
        .server
        .post("/api/batch/start")
        .add_header(AUTHORIZATION, auth())
        .json(&json!({"start_trial": 1, "end_trial": 5, "concurrent": 2}))
        .await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["started"], json!([1, 2]));
    assert_eq!(body["total"], 5);
    assert_eq!(body["pending"], 3);
    assert_eq!(body["message"], "Batch started: 2 trials running, 3 pending");

    let resp = h
        .server
        .get("/api/batch/status")
        .add_header(AUTHORIZATION, auth())
        .await;
    let status: Value = resp.json();
    assert_eq!(status["active"], true);
    assert_eq!(status["batch"]["concurrent"], 2);

    let resp = h
        .server
        .post("/api/batch/cancel")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(
        resp.json::<Value>()["message"],
        "Batch cancelled - running containers will continue"
    );
    assert!(!h.state.batch.is_running());
    assert_eq!(h.runtime.container("aquatic-trial-1").unwrap().status, "running");
}

#[tokio::test]
async fn batch_stop_stops_running_trials() {
    let h = harness();
    h.server
        .post("/api/batch/start")
        .add_header(AUTHORIZATION, auth())
        .json(&json!({"start_trial": 7, "end_trial": 8}))
        .await;

    let resp = h
        .server
        .post("/api/batch/stop")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["success"], true);
    assert_eq!(
        body["stopped"],
        json!(["aquatic-trial-7", "aquatic-trial-8"])
    );
    assert_eq!(h.runtime.container("aquatic-trial-7").unwrap().status, "exited");
}

#[tokio::test]
async fn invalid_batch_range_is_rejected() {
    let h = harness();
    let resp = h
        .server
        .post("/api/batch/start")
        .add_header(AUTHORIZATION, auth())
        .json(&json!({"start_trial": 9, "end_trial": 2}))
        .await;
    assert_eq!(resp.status_code(), 400);

    let resp = h
        .server
        .post("/api/batch/start")
        .add_header(AUTHORIZATION, auth())
        .json(&json!({"start_trial": 0, "end_trial": 4294967295u32}))
        .await;
    assert_eq!(resp.status_code(), 400);
    assert!(!h.state.batch.is_running());
    assert!(h.runtime.runs().is_empty());
}

#[tokio::test]
async fn completed_trials_and_preview() {
    let h = harness();
    write_samples(h.workspace.path(), 2, "radial");

    let resp = h
        .server
        .get("/api/trials/completed")
        .add_header(AUTHORIZATION, auth())
        .await;
    let trials: Value = resp.json();
    assert_eq!(trials[0]["id"], "2");
    assert_eq!(trials[0]["field_count"], 1);

    let resp = h
        .server
        .get("/api/trial/2/data")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 200);
    let preview: Value = resp.json();
    assert_eq!(preview["field"], "radial");
    assert_eq!(preview["total_preview"], 2);
    assert_eq!(preview["rows"][1]["value"], "2.5");

    let resp = h
        .server
        .get("/api/trial/2/data")
        .add_query_param("field", "y_compress")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 404);
}

#[tokio::test]
async fn download_returns_zip_attachment() {
    let h = harness();
    write_samples(h.workspace.path(), 4, "radial");

    let resp = h
        .server
        .get("/api/download/4")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 200);
    assert_eq!(
        resp.headers().get("content-disposition").and_then(|v| v.to_str().ok()),
        Some("attachment; filename=trial_4_data.zip")
    );
    assert!(resp.as_bytes().starts_with(b"PK"));

    let resp = h
        .server
        .get("/api/download/99")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 404);
}

#[tokio::test]
async fn delete_data_removes_both_directories() {
    let h = harness();
    write_samples(h.workspace.path(), 6, "radial");
    let results = h.workspace.path().join("reconstruction/results/trial_6");
    fs::create_dir_all(&results).unwrap();

    let resp = h
        .server
        .delete("/api/trial/6/data")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Deleted trial 6");
    assert_eq!(body["deleted"].as_array().unwrap().len(), 2);
    assert!(!results.exists());

    let resp = h
        .server
        .delete("/api/trial/6/data")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 404);
    assert_eq!(resp.json::<Value>()["detail"], "No data found for trial 6");
}

#[tokio::test]
async fn reconstruction_without_data_is_not_found() {
    let h = harness();
    let resp = h
        .server
        .post("/api/reconstruct/11")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 404);
    assert_eq!(resp.json::<Value>()["detail"], "Trial 11 data not found");

    let resp = h
        .server
        .get("/api/reconstruct/11/status")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(
        resp.json::<Value>(),
        json!({"running": false, "message": "No reconstruction process found"})
    );

    let resp = h
        .server
        .get("/api/reconstruct/11/images")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.json::<Value>(), json!({"trial_id": 11, "images": []}));
}

#[tokio::test]
async fn result_images_are_public_and_confined() {
    let h = harness();
    let plots = h.workspace.path().join("reconstruction/results/trial_1/standard_gp");
    fs::create_dir_all(&plots).unwrap();
    fs::write(plots.join("map.png"), b"\x89PNG").unwrap();
    fs::write(h.workspace.path().join("secret.png"), b"nope").unwrap();

    let resp = h
        .server
        .get("/api/reconstruct/1/image/standard_gp/map.png")
        .await;
    assert_eq!(resp.status_code(), 200);
    assert_eq!(
        resp.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("image/png")
    );

    let resp = h
        .server
        .get("/api/reconstruct/1/image/..%2F..%2F..%2Fsecret.png")
        .await;
    assert_eq!(resp.status_code(), 403);

    let resp = h.server.get("/api/reconstruct/1/image/missing.png").await;
    assert_eq!(resp.status_code(), 404);
}

#[tokio::test]
async fn desktop_status_reports_stopped_services() {
    let h = harness();
    let resp = h
        .server
        .get("/api/host/vnc/status")
        .add_header(AUTHORIZATION, auth())
        .await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body["running"], false);
    assert_eq!(body["x11vnc_running"], false);
}

#[tokio::test]
async fn metrics_are_exposed() {
    let h = harness();
    fieldpanel_api::metrics::register_metrics();
    h.server
        .post("/api/trial/start/1")
        .add_header(AUTHORIZATION, auth())
        .await;

    let resp = h.server.get("/metrics").await;
    assert_eq!(resp.status_code(), 200);
    assert!(resp.text().contains("fieldpanel_trials_started_total"));
}

#[tokio::test]
async fn websocket_pushes_snapshots_and_events() {
    let workspace = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let state = AppState::new(
        settings(workspace.path()),
        Some(runtime as Arc<dyn ContainerRuntime>),
        Arc::new(NoProcesses),
    )
    .unwrap();
    let server = TestServer::builder()
        .http_transport()
        .build(create_router(state.clone()))
        .unwrap();

    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    let snapshot: Value = ws.receive_json().await;
    assert!(snapshot["containers"].is_array());
    assert!(snapshot["timestamp"].is_string());

    state.events.publish(PanelEvent::BatchCancelled);
    let event: Value = ws.receive_json().await;
    assert_eq!(event, json!({"event": "batch_cancelled"}));
}
