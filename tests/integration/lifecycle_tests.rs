use std::sync::Arc;

use agent_arena::bridge::EventSink;
use agent_arena::config::{DevServerConfig, ScaffoldConfig};
use agent_arena::environment::runtime::ContainerRuntime;
use agent_arena::models::event::EventKind;
use agent_arena::models::session::{DevServerStatus, Session};
use agent_arena::orchestrator::agent::AgentService;
use agent_arena::orchestrator::driver::SessionDriver;
use agent_arena::orchestrator::lifecycle::{LifecycleRunner, RunFailure};
use agent_arena::orchestrator::scaffold::Scaffolder;
use agent_arena::persistence::environment_repo::EnvironmentRepo;
use agent_arena::persistence::session_repo::SessionRepo;
use agent_arena::ports::reservation::PortReservations;
use agent_arena::supervisor::ProcessSupervisor;
use agent_arena::AppError;
use serial_test::serial;
use tempfile::TempDir;

use super::test_helpers::{
    marker_dev_server, memory_db, seed_session, supervisor, test_allocator, FakeAgent, RecordingSink,
};

struct Fixture {
    runner: LifecycleRunner,
    sink: Arc<RecordingSink>,
    agent: Arc<FakeAgent>,
    sessions: SessionRepo,
    reservations: Arc<PortReservations>,
    supervisor: ProcessSupervisor,
    session: Session,
    port: u16,
    _dir: TempDir,
}

async fn fixture(agent: FakeAgent, dev_server: &DevServerConfig, scaffold: &ScaffoldConfig) -> Fixture {
    let db = memory_db().await;
    let sessions = SessionRepo::new(Arc::clone(&db));
    let reservations = Arc::new(PortReservations::new(
        test_allocator(),
        sessions.clone(),
        EnvironmentRepo::new(db),
        None::<Arc<dyn ContainerRuntime>>,
    ));
    let supervisor = supervisor(dev_server, sessions.clone());

    let sink = Arc::new(RecordingSink::default());
    let agent = Arc::new(agent);
    let dyn_sink: Arc<dyn EventSink> = sink.clone();
    let dyn_agent: Arc<dyn AgentService> = agent.clone();
    let driver = SessionDriver::new(dyn_sink, dyn_agent, Scaffolder::from_config(scaffold));
    let runner = LifecycleRunner::new(driver, supervisor.clone(), Arc::clone(&reservations));

    let dir = tempfile::tempdir().expect("tempdir");
    let workdir = dir.path().join("app");
    let session = seed_session(&sessions, &workdir.to_string_lossy()).await;
    let port = reservations
        .reserve_app_port(session.id)
        .await
        .expect("reserve");

    Fixture {
        runner,
        sink,
        agent,
        sessions,
        reservations,
        supervisor,
        session,
        port,
        _dir: dir,
    }
}

#[tokio::test]
#[serial]
async fn successful_run_emits_every_step_in_order() {
    let f = fixture(FakeAgent::default(), &marker_dev_server(), &ScaffoldConfig::default()).await;

    let server = f
        .runner
        .run_session_lifecycle(&f.session, "build a todo app", f.port)
        .await
        .expect("run");

    assert_eq!(
        f.sink.names(),
        vec![
            "setup-started",
            "agent-session-created",
            "setup-completed",
            "prompt-started",
            "prompt-completed",
            "dev-server-started",
        ]
    );
    assert_eq!(server.port, f.port);
    assert!(std::path::Path::new(&f.session.directory).is_dir());

    let prompts = f.agent.prompts.lock().expect("lock").clone();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].text, "build a todo app");
    assert_eq!(prompts[0].remote_session_id, "ses_0");
    assert_eq!(prompts[0].model_id, "big-pickle");
    assert_eq!(prompts[0].provider_id, "opencode");

    let session = f.sessions.require(f.session.id).await.expect("load");
    assert_eq!(session.port, Some(f.port));
    assert_eq!(session.dev_server_status, DevServerStatus::Running);

    f.supervisor.stop(f.session.id).await.expect("stop");
}

#[tokio::test]
#[serial]
async fn agent_session_failure_stops_at_setup() {
    let agent = FakeAgent {
        fail_create: Some("agent offline".into()),
        ..FakeAgent::default()
    };
    let f = fixture(agent, &marker_dev_server(), &ScaffoldConfig::default()).await;

    let failure = f
        .runner
        .run_session_lifecycle(&f.session, "hello", f.port)
        .await
        .expect_err("setup fails");
    assert!(matches!(failure, RunFailure::Setup(AppError::Agent(_))), "{failure}");
    assert_eq!(f.sink.names(), vec!["setup-started", "setup-failed"]);

    let events = f.sink.events();
    assert!(matches!(
        &events[1].kind,
        EventKind::SetupFailed { error } if error.contains("agent offline")
    ));
    assert!(f.sessions.require(f.session.id).await.expect("load").port.is_none());
    assert!(f.agent.prompts.lock().expect("lock").is_empty());
}

#[tokio::test]
#[serial]
async fn failing_scaffold_script_reports_stderr() {
    let scripts = tempfile::tempdir().expect("tempdir");
    let script = scripts.path().join("scaffold.sh");
    std::fs::write(&script, "echo \"unknown template $2\" >&2\nexit 2\n").expect("write script");
    let scaffold = ScaffoldConfig {
        shell: "sh".into(),
        script: Some(script),
        ..ScaffoldConfig::default()
    };
    let f = fixture(FakeAgent::default(), &marker_dev_server(), &scaffold).await;

    let failure = f
        .runner
        .run_session_lifecycle(&f.session, "hello", f.port)
        .await
        .expect_err("scaffold fails");
    match failure {
        RunFailure::Setup(AppError::Process(msg)) => {
            assert!(msg.contains("unknown template react-ts-vite-tailwind-v4"), "{msg}");
        }
        other => panic!("unexpected failure: {other}"),
    }
    assert_eq!(f.agent.created.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
#[serial]
async fn prompt_failure_releases_the_port() {
    let agent = FakeAgent {
        fail_prompt: Some("model overloaded".into()),
        ..FakeAgent::default()
    };
    let f = fixture(agent, &marker_dev_server(), &ScaffoldConfig::default()).await;

    let failure = f
        .runner
        .run_session_lifecycle(&f.session, "hello", f.port)
        .await
        .expect_err("prompt fails");
    assert!(matches!(failure, RunFailure::Prompt(_)), "{failure}");
    assert_eq!(
        f.sink.names(),
        vec![
            "setup-started",
            "agent-session-created",
            "setup-completed",
            "prompt-started",
            "prompt-failed",
        ]
    );
    assert!(f.sessions.require(f.session.id).await.expect("load").port.is_none());
    assert!(!f.supervisor.is_running(f.session.id));

    let availability = f.reservations.availability().await.expect("availability");
    assert!(availability.app.used.is_empty());
}

#[tokio::test]
#[serial]
async fn dev_server_failure_is_reported() {
    let crashing = DevServerConfig {
        args: vec!["-c".into(), "exit 1".into(), "dev-server".into()],
        ..marker_dev_server()
    };
    let f = fixture(FakeAgent::default(), &crashing, &ScaffoldConfig::default()).await;

    let failure = f
        .runner
        .run_session_lifecycle(&f.session, "hello", f.port)
        .await
        .expect_err("dev server fails");
    assert!(matches!(failure, RunFailure::DevServer(AppError::Process(_))), "{failure}");
    assert_eq!(f.sink.names().last(), Some(&"dev-server-failed"));

    let session = f.sessions.require(f.session.id).await.expect("load");
    assert_eq!(session.dev_server_status, DevServerStatus::Error);
    assert!(session.port.is_none());
}
