// Dashboard API tests: status, runs lifecycle, reconstruction endpoints
#![cfg(unix)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use schedscope_core::config::SchedulerConfig;
use schedscope_core::{Broadcaster, RunId, RunLog, RunStore, Supervisor};
use schedscope_manager::dashboard::{router, AppState};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

// ============================================================================
// Test Setup Helpers
// ============================================================================

const SCRIPT: &str = r#"
echo '{"event":"job_arrived","tick":0,"data":{"pid":1,"burst":3}}'
echo '{"event":"job_started","tick":0,"data":{"pid":1}}'
echo '{"event":"job_arrived","tick":1,"data":{"pid":2,"burst":2}}'
echo '{"event":"job_finished","tick":3,"data":{"pid":1}}'
echo '{"event":"job_started","tick":3,"data":{"pid":2}}'
echo '{"event":"job_finished","tick":5,"data":{"pid":2}}'
echo 'scheduler done' >&2
"#;

fn create_test_state(dir: &Path) -> Arc<AppState> {
    let config = SchedulerConfig {
        binary: "sh".to_string(),
        args: vec!["-c".to_string()],
        work_dir: dir.join("work"),
        max_concurrent_runs: 0,
        ..SchedulerConfig::default()
    };
    let log = Arc::new(RunLog::new());
    let hub = Broadcaster::new(256);
    log.add_listener(Arc::new(hub.clone()));
    let supervisor = Supervisor::new(config, log, hub, RunStore::with_base_dir(dir.join("runs")));
    Arc::new(AppState::new(supervisor, 0))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: &Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

/// Start the script through the API and wait for it to finish
async fn start_finished_run(app: &Router, state: &AppState) -> RunId {
    let (status, body) = post_json(
        app,
        "/api/runs",
        json!({ "mode": "fcfs", "extra_args": [SCRIPT] }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let run_id: RunId = body["run_id"].as_str().unwrap().parse().unwrap();
    state.supervisor.wait(run_id).await.unwrap();
    run_id
}

// ============================================================================
// Status and runs
// ============================================================================

#[tokio::test]
async fn test_status_endpoint() {
    let dir = tempdir().unwrap();
    let state = create_test_state(dir.path());
    let app = router(state);

    let (status, body) = get_json(&app, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_runs"], 0);
    assert_eq!(body["scheduler"], "sh");
}

#[tokio::test]
async fn test_runs_list_empty() {
    let dir = tempdir().unwrap();
    let app = router(create_test_state(dir.path()));

    let (status, body) = get_json(&app, "/api/runs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
    assert!(body["runs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_start_run_and_inspect() {
    let dir = tempdir().unwrap();
    let state = create_test_state(dir.path());
    let app = router(state.clone());
    let run_id = start_finished_run(&app, &state).await;

    let (status, body) = get_json(&app, &format!("/api/runs/{}", run_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run"]["status"], "finished");
    assert_eq!(body["run"]["algorithm"], "fcfs");
    assert_eq!(body["run"]["event_count"], 6);
    assert_eq!(body["stderr"], json!(["scheduler done"]));

    let (_, list) = get_json(&app, "/api/runs").await;
    assert_eq!(list["count"], 1);
    assert_eq!(list["runs"][0]["run_id"], run_id.to_string());
}

#[tokio::test]
async fn test_invalid_launch_rejected() {
    let dir = tempdir().unwrap();
    let app = router(create_test_state(dir.path()));

    let (status, body) = post_json(&app, "/api/runs", json!({ "mode": "rr", "quantum": 0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("quantum"));
}

#[tokio::test]
async fn test_bad_and_unknown_run_ids() {
    let dir = tempdir().unwrap();
    let app = router(create_test_state(dir.path()));

    let (status, _) = get_json(&app, "/api/runs/not-a-run").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(&app, &format!("/api/runs/{}", RunId::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&app, &format!("/api/runs/{}/timeline", RunId::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stop_finished_run_is_noop() {
    let dir = tempdir().unwrap();
    let state = create_test_state(dir.path());
    let app = router(state.clone());
    let run_id = start_finished_run(&app, &state).await;

    let (status, body) = post_json(&app, &format!("/api/runs/{}/stop", run_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stopped"], false);
}

#[tokio::test]
async fn test_stop_running_run() {
    let dir = tempdir().unwrap();
    let state = create_test_state(dir.path());
    let app = router(state.clone());

    let (status, body) = post_json(
        &app,
        "/api/runs",
        json!({ "mode": "rr", "quantum": 2, "extra_args": ["exec sleep 30"] }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let run_id = body["run_id"].as_str().unwrap().to_string();

    let (status, body) = post_json(&app, &format!("/api/runs/{}/stop", run_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stopped"], true);

    let (_, body) = get_json(&app, &format!("/api/runs/{}", run_id)).await;
    assert_eq!(body["run"]["status"], "killed");
}

#[tokio::test]
async fn test_delete_run() {
    let dir = tempdir().unwrap();
    let state = create_test_state(dir.path());
    let app = router(state.clone());
    let run_id = start_finished_run(&app, &state).await;

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/runs/{}", run_id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!state.supervisor.store().exists(run_id));

    let (status, _) = get_json(&app, &format!("/api/runs/{}", run_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, list) = get_json(&app, "/api/runs").await;
    assert_eq!(list["count"], 0);
}

#[tokio::test]
async fn test_delete_running_run_conflicts() {
    let dir = tempdir().unwrap();
    let state = create_test_state(dir.path());
    let app = router(state.clone());

    let (status, body) = post_json(
        &app,
        "/api/runs",
        json!({ "mode": "fcfs", "extra_args": ["exec sleep 30"] }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let run_id: RunId = body["run_id"].as_str().unwrap().parse().unwrap();

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/runs/{}", run_id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(state.supervisor.run(run_id).is_some());

    state.supervisor.shutdown().await;
}

// ============================================================================
// Events and reconstruction
// ============================================================================

#[tokio::test]
async fn test_events_from_sequence() {
    let dir = tempdir().unwrap();
    let state = create_test_state(dir.path());
    let app = router(state.clone());
    let run_id = start_finished_run(&app, &state).await;

    let (status, body) = get_json(&app, &format!("/api/runs/{}/events?from=4", run_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["last_sequence"], 6);
    assert_eq!(body["sealed"], true);
    assert_eq!(body["events"][0]["sequence"], 5);
}

#[tokio::test]
async fn test_timeline_at_tick() {
    let dir = tempdir().unwrap();
    let state = create_test_state(dir.path());
    let app = router(state.clone());
    let run_id = start_finished_run(&app, &state).await;

    let (status, body) = get_json(&app, &format!("/api/runs/{}/timeline", run_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_tick"], 5);
    let segments = body["timeline"]["segments"].as_array().unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0]["pid"], 1);
    assert_eq!(segments[1]["end_tick"], 5);

    let (_, body) = get_json(&app, &format!("/api/runs/{}/timeline?tick=2", run_id)).await;
    assert_eq!(body["tick"], 2);
    let segments = body["timeline"]["segments"].as_array().unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0]["pid"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let dir = tempdir().unwrap();
    let state = create_test_state(dir.path());
    let app = router(state.clone());
    let run_id = start_finished_run(&app, &state).await;

    let (status, body) = get_json(&app, &format!("/api/runs/{}/metrics", run_id)).await;
    assert_eq!(status, StatusCode::OK);
    let metrics = &body["metrics"];
    assert_eq!(metrics["aggregates"]["count_finished"], 2);
    assert_eq!(metrics["processes"]["2"]["waiting"], 2);
    assert_eq!(metrics["processes"]["2"]["turnaround"], 4);
    assert!(body["summary"].is_null());
}

#[tokio::test]
async fn test_report_formats() {
    let dir = tempdir().unwrap();
    let state = create_test_state(dir.path());
    let app = router(state.clone());
    let run_id = start_finished_run(&app, &state).await;

    let request = Request::builder()
        .uri(format!("/api/runs/{}/report?format=csv", run_id))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let csv = String::from_utf8(body.to_vec()).unwrap();
    assert!(csv.starts_with("PID,Arrival,Burst"));

    let (status, _) = get_json(&app, &format!("/api/runs/{}/report?format=pdf", run_id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
