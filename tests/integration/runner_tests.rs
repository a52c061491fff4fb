use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_arena::bridge::EventSink;
use agent_arena::config::ScaffoldConfig;
use agent_arena::orchestrator::agent::AgentService;
use agent_arena::orchestrator::driver::SessionDriver;
use agent_arena::orchestrator::scaffold::Scaffolder;
use agent_arena::runner::server::serve_runner;
use agent_arena::runner::{RunnerConfig, RunnerState};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{FakeAgent, RecordingSink};

struct Runner {
    base_url: String,
    state: Arc<RunnerState>,
    sink: Arc<RecordingSink>,
    agent: Arc<FakeAgent>,
    client: reqwest::Client,
    ct: CancellationToken,
    _dir: TempDir,
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

impl Runner {
    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("request");
        let status = response.status();
        (status, response.json().await.expect("json body"))
    }

    async fn wait_for_events(&self, count: usize) -> Vec<&'static str> {
        for _ in 0..250 {
            let names = self.sink.names();
            if names.len() >= count {
                return names;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.sink.names()
    }
}

async fn spawn_runner(agent: FakeAgent, code_dir: impl FnOnce(&TempDir) -> PathBuf) -> Runner {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = Arc::new(RecordingSink::default());
    let agent = Arc::new(agent);
    let dyn_sink: Arc<dyn EventSink> = sink.clone();
    let dyn_agent: Arc<dyn AgentService> = agent.clone();
    let driver = SessionDriver::new(
        dyn_sink,
        dyn_agent,
        Scaffolder::from_config(&ScaffoldConfig::default()),
    );
    let state = Arc::new(RunnerState::new(
        RunnerConfig {
            code_dir: code_dir(&dir),
            templates: vec!["react-ts-vite-tailwind-v4".into()],
            default_provider: "opencode".into(),
        },
        driver,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let ct = CancellationToken::new();
    tokio::spawn(serve_runner(listener, Arc::clone(&state), ct.clone()));

    Runner {
        base_url: format!("http://{addr}"),
        state,
        sink,
        agent,
        client: reqwest::Client::new(),
        ct,
        _dir: dir,
    }
}

fn code_subdir(dir: &TempDir) -> PathBuf {
    dir.path().join("code")
}

fn existing_dir(dir: &TempDir) -> PathBuf {
    dir.path().to_path_buf()
}

#[tokio::test]
async fn health_reports_healthy() {
    let runner = spawn_runner(FakeAgent::default(), code_subdir).await;
    let body: Value = runner
        .client
        .get(format!("{}/health", runner.base_url))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body, json!({ "status": "healthy" }));
}

#[tokio::test]
async fn undecodable_bodies_get_json_errors() {
    let runner = spawn_runner(FakeAgent::default(), existing_dir).await;

    let (status, body) = runner.post("/execute", json!({ "prompt": "hi", "modelId": "m" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("message").contains("sessionId"));

    let response = runner
        .client
        .post(format!("{}/setup", runner.base_url))
        .header("content-type", "application/json")
        .body("{broken")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("json body");
    assert!(body["error"].as_str().expect("message").contains("invalid json body"));
    assert!(runner.sink.names().is_empty());
}

#[tokio::test]
async fn setup_validates_the_template() {
    let runner = spawn_runner(FakeAgent::default(), code_subdir).await;

    let (status, body) = runner.post("/setup", json!({ "sessionId": 1 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("message").contains("template is required"));

    let (status, body) = runner
        .post("/setup", json!({ "sessionId": 1, "template": "svelte-kit" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("message").contains("svelte-kit"));
    assert!(runner.sink.names().is_empty());
}

#[tokio::test]
async fn setup_scaffolds_and_opens_agent_session() {
    let runner = spawn_runner(FakeAgent::default(), code_subdir).await;

    let (status, body) = runner
        .post(
            "/setup",
            json!({ "sessionId": "7", "template": "react-ts-vite-tailwind-v4" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let names = runner.wait_for_events(3).await;
    assert_eq!(names, vec!["setup-started", "agent-session-created", "setup-completed"]);
    assert!(runner.sink.events().iter().all(|e| e.session_id == 7));

    let mut remote = None;
    for _ in 0..50 {
        remote = runner.state.remote_session(7).await;
        if remote.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(remote.as_deref(), Some("ses_0"));
}

#[tokio::test]
async fn execute_requires_the_code_directory() {
    let runner = spawn_runner(FakeAgent::default(), code_subdir).await;
    let (status, body) = runner
        .post(
            "/execute",
            json!({ "sessionId": 3, "prompt": "hi", "modelId": "big-pickle" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("message").contains("/setup"));
}

#[tokio::test]
async fn execute_requires_prompt_and_model() {
    let runner = spawn_runner(FakeAgent::default(), existing_dir).await;
    let (status, _) = runner
        .post("/execute", json!({ "sessionId": 3, "prompt": "  ", "modelId": "big-pickle" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = runner
        .post("/execute", json!({ "sessionId": 3, "prompt": "hi" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn execute_opens_a_session_when_none_exists() {
    let runner = spawn_runner(FakeAgent::default(), existing_dir).await;
    let (status, body) = runner
        .post(
            "/execute",
            json!({ "sessionId": 3, "prompt": "add dark mode", "modelId": "big-pickle" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "execution started");

    let names = runner.wait_for_events(3).await;
    assert_eq!(names, vec!["agent-session-created", "prompt-started", "prompt-completed"]);

    let prompts = runner.agent.prompts.lock().expect("lock").clone();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].provider_id, "opencode");
    assert_eq!(prompts[0].text, "add dark mode");
}

#[tokio::test]
async fn execute_reports_agent_session_failure() {
    let agent = FakeAgent {
        fail_create: Some("agent offline".into()),
        ..FakeAgent::default()
    };
    let runner = spawn_runner(agent, existing_dir).await;
    let (status, _) = runner
        .post(
            "/execute",
            json!({ "sessionId": 4, "prompt": "hi", "modelId": "big-pickle", "providerId": "anthropic" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let names = runner.wait_for_events(1).await;
    assert_eq!(names, vec!["prompt-failed"]);
    assert!(runner.agent.prompts.lock().expect("lock").is_empty());
}
