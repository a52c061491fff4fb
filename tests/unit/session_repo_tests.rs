use std::sync::Arc;

use agent_arena::models::session::{DevServerStatus, NewSession, SessionStatus, DEFAULT_TEMPLATE};
use agent_arena::persistence::batch_repo::BatchRepo;
use agent_arena::persistence::db;
use agent_arena::persistence::session_repo::{PortClaim, SessionRepo};
use agent_arena::AppError;

async fn repo() -> (SessionRepo, BatchRepo) {
    let db = Arc::new(db::connect_memory().await.expect("memory db"));
    (SessionRepo::new(Arc::clone(&db)), BatchRepo::new(db))
}

#[tokio::test]
async fn create_applies_initial_state() {
    let (sessions, _) = repo().await;
    let session = sessions
        .create(&NewSession::new("/tmp/s1", "big-pickle", "opencode"))
        .await
        .expect("create");

    assert_eq!(session.status, SessionStatus::Uninitialized);
    assert_eq!(session.dev_server_status, DevServerStatus::Stopped);
    assert_eq!(session.starter_template, DEFAULT_TEMPLATE);
    assert!(session.port.is_none());
    assert!(session.error.is_none());
    assert!(session.remote_session_id.is_none());
    assert!(session.dev_server_pid.is_none());
}

#[tokio::test]
async fn create_links_batch() {
    let (sessions, batches) = repo().await;
    let batch = batches
        .create(Some("landing pages"), Some("build a landing page"))
        .await
        .expect("batch");
    let session = sessions
        .create(&NewSession::new("/tmp/s1", "m", "p").in_batch(batch.id))
        .await
        .expect("create");
    assert_eq!(session.batch_id, Some(batch.id));

    let loaded = batches.get_by_id(batch.id).await.expect("get").expect("exists");
    assert_eq!(loaded.prompt.as_deref(), Some("build a landing page"));
}

#[tokio::test]
async fn require_unknown_is_not_found() {
    let (sessions, _) = repo().await;
    let err = sessions.require(999).await.expect_err("unknown id");
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(sessions.get_by_id(999).await.expect("query").is_none());
}

#[tokio::test]
async fn error_is_kept_only_for_failure_statuses() {
    let (sessions, _) = repo().await;
    let id = sessions
        .create(&NewSession::new("/tmp/s1", "m", "p"))
        .await
        .expect("create")
        .id;

    sessions
        .update_status(id, SessionStatus::Failed, Some("agent unreachable"))
        .await
        .expect("fail");
    let failed = sessions.require(id).await.expect("load");
    assert_eq!(failed.status, SessionStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("agent unreachable"));

    sessions
        .update_status(id, SessionStatus::Prompting, Some("ignored"))
        .await
        .expect("prompting");
    let prompting = sessions.require(id).await.expect("load");
    assert_eq!(prompting.status, SessionStatus::Prompting);
    assert!(prompting.error.is_none());
}

#[tokio::test]
async fn pid_is_stored_only_while_active() {
    let (sessions, _) = repo().await;
    let id = sessions
        .create(&NewSession::new("/tmp/s1", "m", "p"))
        .await
        .expect("create")
        .id;

    sessions
        .update_dev_server(id, DevServerStatus::Running, Some(4242))
        .await
        .expect("running");
    assert_eq!(sessions.require(id).await.expect("load").dev_server_pid, Some(4242));
    assert_eq!(sessions.list_dev_server_active().await.expect("active").len(), 1);

    sessions
        .update_dev_server(id, DevServerStatus::Error, Some(4242))
        .await
        .expect("error");
    let session = sessions.require(id).await.expect("load");
    assert_eq!(session.dev_server_status, DevServerStatus::Error);
    assert!(session.dev_server_pid.is_none());
    assert!(sessions.list_dev_server_active().await.expect("active").is_empty());
}

#[tokio::test]
async fn remote_session_id_is_recorded() {
    let (sessions, _) = repo().await;
    let id = sessions
        .create(&NewSession::new("/tmp/s1", "m", "p"))
        .await
        .expect("create")
        .id;
    sessions.set_remote_session_id(id, "ses_abc").await.expect("set");
    assert_eq!(
        sessions.require(id).await.expect("load").remote_session_id.as_deref(),
        Some("ses_abc")
    );
}

#[tokio::test]
async fn port_claims_are_exclusive() {
    let (sessions, _) = repo().await;
    let first = sessions.create(&NewSession::new("/tmp/a", "m", "p")).await.expect("a").id;
    let second = sessions.create(&NewSession::new("/tmp/b", "m", "p")).await.expect("b").id;

    assert_eq!(sessions.claim_port(first, 5173).await.expect("claim"), PortClaim::Claimed);
    assert_eq!(sessions.claim_port(first, 5174).await.expect("claim"), PortClaim::AlreadyHeld);
    assert_eq!(sessions.claim_port(second, 5173).await.expect("claim"), PortClaim::Taken);
    assert_eq!(sessions.require(first).await.expect("load").port, Some(5173));
    assert!(sessions.require(second).await.expect("load").port.is_none());

    assert_eq!(sessions.reserved_ports().await.expect("ports"), vec![5173]);
}

#[tokio::test]
async fn released_port_can_be_claimed_again() {
    let (sessions, _) = repo().await;
    let first = sessions.create(&NewSession::new("/tmp/a", "m", "p")).await.expect("a").id;
    let second = sessions.create(&NewSession::new("/tmp/b", "m", "p")).await.expect("b").id;

    sessions.claim_port(first, 5173).await.expect("claim");
    sessions.release_port(first).await.expect("release");
    assert!(sessions.reserved_ports().await.expect("ports").is_empty());
    assert_eq!(sessions.claim_port(second, 5173).await.expect("claim"), PortClaim::Claimed);
}
