use std::time::Duration;

use agent_arena::models::session::{DevServerStatus, NewSession, SessionStatus};
use agent_arena::models::turn::TurnStatus;
use reqwest::StatusCode;
use serde_json::{json, Value};
use serial_test::serial;

use super::test_helpers::{marker_dev_server, seed_session, spawn_app, FakeAgent, TestApp};

async fn post(app: &TestApp, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = app.client.post(app.url(path));
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await.expect("request");
    let status = response.status();
    (status, response.json().await.expect("json body"))
}

async fn get(app: &TestApp, path: &str) -> (StatusCode, Value) {
    let response = app.client.get(app.url(path)).send().await.expect("request");
    let status = response.status();
    (status, response.json().await.expect("json body"))
}

#[tokio::test]
async fn health_answers_ok() {
    let app = spawn_app(FakeAgent::default(), marker_dev_server()).await;
    let response = app.client.get(app.url("/health")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.expect("body"), "ok");
}

#[tokio::test]
async fn unknown_session_is_404_with_error_body() {
    let app = spawn_app(FakeAgent::default(), marker_dev_server()).await;
    let (status, body) = get(&app, "/sessions/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not found: session 999");
}

#[tokio::test]
async fn get_session_returns_camel_case_record() {
    let app = spawn_app(FakeAgent::default(), marker_dev_server()).await;
    let id = seed_session(&app.sessions, "/tmp/api").await.id;
    let (status, body) = get(&app, &format!("/sessions/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);
    assert_eq!(body["status"], "uninitialized");
    assert_eq!(body["devServerStatus"], "stopped");
    assert_eq!(body["modelId"], "big-pickle");
}

#[tokio::test]
async fn run_without_message_or_batch_prompt_is_rejected() {
    let app = spawn_app(FakeAgent::default(), marker_dev_server()).await;
    let id = seed_session(&app.sessions, "/tmp/api").await.id;

    let (status, body) = post(&app, &format!("/sessions/{id}/run"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("message").contains("no message"));
    assert!(app.sessions.require(id).await.expect("load").port.is_none());
}

#[tokio::test]
async fn malformed_run_body_is_rejected() {
    let app = spawn_app(FakeAgent::default(), marker_dev_server()).await;
    let id = seed_session(&app.sessions, "/tmp/api").await.id;

    let response = app
        .client
        .post(app.url(&format!("/sessions/{id}/run")))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
async fn run_drives_session_to_completion() {
    let app = spawn_app(FakeAgent::default(), marker_dev_server()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let workdir = dir.path().join("app");
    let id = seed_session(&app.sessions, &workdir.to_string_lossy()).await.id;

    let (status, body) = post(
        &app,
        &format!("/sessions/{id}/run"),
        Some(json!({ "message": "build a landing page" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], id);
    assert_eq!(body["port"], 5173);
    assert_eq!(body["status"], "starting");

    let session = app
        .wait_for_session(id, |s| {
            s.status == SessionStatus::Completed && s.dev_server_status == DevServerStatus::Running
        })
        .await;
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.dev_server_status, DevServerStatus::Running);
    assert_eq!(session.remote_session_id.as_deref(), Some("ses_0"));
    assert_eq!(session.port, Some(5173));
    assert!(session.dev_server_pid.is_some());

    let turns = app.turns.list_for_session(id).await.expect("turns");
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].status, TurnStatus::Completed);

    let (_, running) = get(&app, "/sessions/running").await;
    assert_eq!(running.as_array().map(Vec::len), Some(1));
    assert_eq!(running[0]["id"], id);

    app.wait_for_run_end(id).await;
    let (status, stopped) = post(&app, &format!("/sessions/{id}/stop-dev"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["status"], "stopped");
    let session = app.sessions.require(id).await.expect("load");
    assert_eq!(session.dev_server_status, DevServerStatus::Stopped);
    assert!(session.port.is_none());
    assert!(session.dev_server_pid.is_none());
}

#[tokio::test]
#[serial]
async fn run_falls_back_to_batch_prompt() {
    let app = spawn_app(FakeAgent::default(), marker_dev_server()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let batch = app
        .batches
        .create(Some("weekly"), Some("make a pomodoro timer"))
        .await
        .expect("batch");
    let id = app
        .sessions
        .create(&NewSession::new(dir.path().to_string_lossy(), "big-pickle", "opencode").in_batch(batch.id))
        .await
        .expect("session")
        .id;

    let (status, _) = post(&app, &format!("/sessions/{id}/run"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    app.wait_for_session(id, |s| s.dev_server_status == DevServerStatus::Running)
        .await;
    let prompts = app.agent.prompts.lock().expect("lock").clone();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].text, "make a pomodoro timer");

    app.supervisor.stop(id).await.expect("stop");
}

#[tokio::test]
#[serial]
async fn only_one_run_per_session_at_a_time() {
    let agent = FakeAgent {
        prompt_delay: Duration::from_millis(500),
        ..FakeAgent::default()
    };
    let app = spawn_app(agent, marker_dev_server()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let id = seed_session(&app.sessions, &dir.path().to_string_lossy()).await.id;
    let path = format!("/sessions/{id}/run");

    let (first, _) = post(&app, &path, Some(json!({ "message": "one" }))).await;
    let (second, body) = post(&app, &path, Some(json!({ "message": "two" }))).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("message").contains("in progress"));

    app.wait_for_session(id, |s| s.dev_server_status == DevServerStatus::Running)
        .await;
    let (third, body) = post(&app, &path, Some(json!({ "message": "three" }))).await;
    assert_eq!(third, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("message").contains("already running"));

    assert_eq!(app.agent.prompts.lock().expect("lock").len(), 1);
    app.supervisor.stop(id).await.expect("stop");
}

#[tokio::test]
#[serial]
async fn dev_server_control_is_refused_during_a_run() {
    let agent = FakeAgent {
        prompt_delay: Duration::from_millis(500),
        ..FakeAgent::default()
    };
    let app = spawn_app(agent, marker_dev_server()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let id = seed_session(&app.sessions, &dir.path().to_string_lossy()).await.id;
    let other = seed_session(&app.sessions, &dir.path().to_string_lossy()).await.id;

    let (status, run) = post(&app, &format!("/sessions/{id}/run"), Some(json!({ "message": "go" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["port"], 5173);

    let (status, body) = post(&app, &format!("/sessions/{id}/stop-dev"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("message").contains("in progress"));
    let (status, _) = post(&app, &format!("/sessions/{id}/start-dev"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.sessions.require(id).await.expect("load").port, Some(5173));

    let session = app
        .wait_for_session(id, |s| s.dev_server_status == DevServerStatus::Running)
        .await;
    assert_eq!(session.port, Some(5173));

    let (status, started) = post(&app, &format!("/sessions/{other}/start-dev"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["port"], 5174);

    app.wait_for_run_end(id).await;
    app.supervisor.stop(id).await.expect("stop");
    app.supervisor.stop(other).await.expect("stop other");
}

#[tokio::test]
#[serial]
async fn failed_prompt_marks_session_failed() {
    let agent = FakeAgent {
        fail_prompt: Some("provider rejected the key".into()),
        ..FakeAgent::default()
    };
    let app = spawn_app(agent, marker_dev_server()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let id = seed_session(&app.sessions, &dir.path().to_string_lossy()).await.id;

    let (status, _) = post(&app, &format!("/sessions/{id}/run"), Some(json!({ "message": "go" }))).await;
    assert_eq!(status, StatusCode::OK);

    let session = app
        .wait_for_session(id, |s| s.status == SessionStatus::Failed && s.port.is_none())
        .await;
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session
        .error
        .as_deref()
        .is_some_and(|e| e.contains("provider rejected the key")));
    assert!(session.port.is_none());
    assert_eq!(session.dev_server_status, DevServerStatus::Stopped);
}

#[tokio::test]
#[serial]
async fn start_dev_is_a_no_op_when_running() {
    let app = spawn_app(FakeAgent::default(), marker_dev_server()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let id = seed_session(&app.sessions, &dir.path().to_string_lossy()).await.id;
    let path = format!("/sessions/{id}/start-dev");

    let (status, first) = post(&app, &path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "running");
    assert_eq!(first["port"], 5173);
    let pid = app.sessions.require(id).await.expect("load").dev_server_pid;

    let (status, second) = post(&app, &path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "running");
    assert_eq!(second["port"], 5173);
    assert_eq!(app.sessions.require(id).await.expect("load").dev_server_pid, pid);

    post(&app, &format!("/sessions/{id}/stop-dev"), None).await;
}

#[tokio::test]
#[serial]
async fn start_dev_failure_releases_the_port() {
    let app = spawn_app(FakeAgent::default(), marker_dev_server()).await;
    let id = seed_session(&app.sessions, "/nonexistent/agent-arena/app").await.id;

    let (status, _) = post(&app, &format!("/sessions/{id}/start-dev"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let session = app.sessions.require(id).await.expect("load");
    assert!(session.port.is_none());
    assert_eq!(session.dev_server_status, DevServerStatus::Error);
}

#[tokio::test]
async fn ports_available_reports_ranges() {
    let app = spawn_app(FakeAgent::default(), marker_dev_server()).await;
    let (status, body) = get(&app, "/ports/available").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["control"]["range"], "3005-3025");
    assert_eq!(body["control"]["total"], 21);
    assert_eq!(body["app"]["range"], "5173-5183");
    assert_eq!(body["app"]["available"].as_array().map(Vec::len), Some(11));
}

#[tokio::test]
async fn container_is_created_once() {
    let app = spawn_app(FakeAgent::default(), marker_dev_server()).await;
    let id = seed_session(&app.sessions, "/tmp/api").await.id;
    let path = format!("/sessions/{id}/container");

    let (status, created) = post(&app, &path, None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["environmentId"], "env-0");
    assert_eq!(created["controlPort"], 3005);
    assert_eq!(created["appPort"], 5173);

    let (status, existing) = post(&app, &path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(existing["environmentId"], "env-0");
    let state = existing["state"].as_str().expect("state");
    assert!(state == "running" || state == "created", "{state}");
    assert_eq!(app.runtime.create_count(), 1);
}

#[tokio::test]
async fn forwarding_without_environment_is_404() {
    let app = spawn_app(FakeAgent::default(), marker_dev_server()).await;
    let id = seed_session(&app.sessions, "/tmp/api").await.id;

    let (status, body) = post(&app, &format!("/sessions/{id}/setup"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().expect("message").contains("no environment"));
}
