use std::sync::Arc;
use std::time::Duration;

use agent_arena::config::GlobalConfig;
use agent_arena::environment::manager::EnvironmentManager;
use agent_arena::environment::runtime::ContainerRuntime;
use agent_arena::persistence::environment_repo::EnvironmentRepo;
use agent_arena::persistence::session_repo::SessionRepo;
use agent_arena::ports::reservation::PortReservations;
use agent_arena::AppError;

use super::test_helpers::{memory_db, seed_session, test_allocator, FakeRuntime};

struct Fixture {
    manager: EnvironmentManager,
    runtime: Arc<FakeRuntime>,
    sessions: SessionRepo,
}

async fn fixture(config: &GlobalConfig) -> Fixture {
    let db = memory_db().await;
    let sessions = SessionRepo::new(Arc::clone(&db));
    let environments = EnvironmentRepo::new(db);
    let runtime = Arc::new(FakeRuntime::default());
    let dyn_runtime: Arc<dyn ContainerRuntime> = runtime.clone();
    let reservations = Arc::new(PortReservations::new(
        test_allocator(),
        sessions.clone(),
        environments.clone(),
        Some(Arc::clone(&dyn_runtime)),
    ));
    let manager = EnvironmentManager::new(
        config,
        dyn_runtime,
        reservations,
        environments,
        sessions.clone(),
    )
    .expect("manager");
    Fixture {
        manager,
        runtime,
        sessions,
    }
}

fn default_config() -> GlobalConfig {
    GlobalConfig::from_toml_str("").expect("default config")
}

#[tokio::test]
async fn ensure_is_idempotent() {
    let f = fixture(&default_config()).await;
    let id = seed_session(&f.sessions, "/tmp/env").await.id;

    let first = f.manager.ensure_environment(id).await.expect("create");
    assert!(first.created);
    assert_eq!(first.control_port, 3005);
    assert_eq!(first.app_port, 5173);

    let second = f.manager.ensure_environment(id).await.expect("ensure again");
    assert!(!second.created);
    assert_eq!(second.environment_id, first.environment_id);
    assert_eq!(second.control_port, first.control_port);
    assert_eq!(f.runtime.create_count(), 1);

    assert_eq!(f.sessions.require(id).await.expect("load").port, Some(5173));
}

#[tokio::test]
async fn concurrent_ensures_create_once() {
    let f = fixture(&default_config()).await;
    let id = seed_session(&f.sessions, "/tmp/env").await.id;

    let (a, b) = tokio::join!(f.manager.ensure_environment(id), f.manager.ensure_environment(id));
    let (a, b) = (a.expect("a"), b.expect("b"));
    assert_eq!(a.environment_id, b.environment_id);
    assert!(a.created ^ b.created);
    assert_eq!(f.runtime.create_count(), 1);
}

#[tokio::test]
async fn spec_carries_ports_and_session_env() {
    let mut config = default_config();
    config.bridge.public_addr = "10.0.0.2:6390".into();
    let f = fixture(&config).await;
    let id = seed_session(&f.sessions, "/tmp/env").await.id;
    f.manager.ensure_environment(id).await.expect("create");

    let created = f.runtime.created.lock().expect("lock").clone();
    let spec = &created[0];
    assert_eq!(spec.image, "agent-arena-coderunner");
    assert_eq!(spec.name, format!("agent-arena-session-{id}"));
    assert_eq!(spec.port_bindings, vec![(3000, 3005), (5173, 5173)]);
    assert!(spec.env.contains(&format!("SESSION_ID={id}")));
    assert!(spec.env.contains(&"BRIDGE_ADDR=10.0.0.2:6390".to_owned()));
}

#[tokio::test]
async fn env_file_entries_are_injected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env_path = dir.path().join("agent.env");
    std::fs::write(&env_path, "# comment\nOPENAI_BASE=https://example.test\n").expect("write env");
    let mut config = default_config();
    config.environment.env_file = Some(env_path);

    let f = fixture(&config).await;
    let id = seed_session(&f.sessions, "/tmp/env").await.id;
    f.manager.ensure_environment(id).await.expect("create");

    let created = f.runtime.created.lock().expect("lock").clone();
    assert!(created[0]
        .env
        .contains(&"OPENAI_BASE=https://example.test".to_owned()));
}

#[tokio::test]
async fn sessions_get_distinct_port_pairs() {
    let f = fixture(&default_config()).await;
    let a = seed_session(&f.sessions, "/tmp/a").await.id;
    let b = seed_session(&f.sessions, "/tmp/b").await.id;

    let first = f.manager.ensure_environment(a).await.expect("a");
    let second = f.manager.ensure_environment(b).await.expect("b");
    assert_ne!(first.control_port, second.control_port);
    assert_ne!(first.app_port, second.app_port);
    assert_eq!((second.control_port, second.app_port), (3006, 5174));
}

#[tokio::test]
async fn failed_create_gives_the_port_back() {
    let f = fixture(&default_config()).await;
    let id = seed_session(&f.sessions, "/tmp/env").await.id;
    *f.runtime.fail_create.lock().expect("lock") = Some("image not found".into());

    let err = f.manager.ensure_environment(id).await.expect_err("create fails");
    assert!(matches!(err, AppError::Container(_)), "{err}");
    assert!(f.sessions.require(id).await.expect("load").port.is_none());
    assert!(f.manager.record_for(id).await.expect("record").is_none());

    *f.runtime.fail_create.lock().expect("lock") = None;
    let ensured = f.manager.ensure_environment(id).await.expect("retry");
    assert!(ensured.created);
    assert_eq!(ensured.app_port, 5173);
}

#[tokio::test]
async fn orphaned_environment_name_is_replaced() {
    let f = fixture(&default_config()).await;
    let id = seed_session(&f.sessions, "/tmp/env").await.id;
    let name = format!("agent-arena-session-{id}");
    f.runtime.names.lock().expect("lock").insert(name.clone());

    let ensured = f.manager.ensure_environment(id).await.expect("create over orphan");
    assert!(ensured.created);
    assert_eq!(*f.runtime.removed.lock().expect("lock"), vec![name]);
    assert_eq!(f.runtime.create_count(), 1);
    assert!(f.manager.record_for(id).await.expect("record").is_some());
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let f = fixture(&default_config()).await;
    let err = f.manager.ensure_environment(77).await.expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(f.runtime.create_count(), 0);
}

#[tokio::test]
async fn control_port_requires_a_running_environment() {
    let f = fixture(&default_config()).await;
    let id = seed_session(&f.sessions, "/tmp/env").await.id;

    let missing = f.manager.control_port(id).await.expect_err("no environment");
    assert!(matches!(missing, AppError::NotFound(_)));

    f.manager.ensure_environment(id).await.expect("create");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let port = loop {
        match f.manager.control_port(id).await {
            Ok(port) => break port,
            Err(AppError::Conflict(_)) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(err) => panic!("environment never started: {err}"),
        }
    };
    assert_eq!(port, 3005);
}

#[tokio::test]
async fn inspect_unknown_environment_is_not_found() {
    let f = fixture(&default_config()).await;
    let err = f.manager.inspect("env-404").await.expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
}
