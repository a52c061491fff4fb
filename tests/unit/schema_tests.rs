use agent_arena::persistence::db;
use agent_arena::persistence::schema::bootstrap_schema;

#[tokio::test]
async fn schema_creates_all_tables() {
    let pool = db::connect_memory().await.expect("memory db");
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .expect("list tables");
    assert_eq!(tables, vec!["batch", "environment", "session", "turn"]);
}

#[tokio::test]
async fn schema_bootstrap_is_reentrant() {
    let pool = db::connect_memory().await.expect("memory db");
    bootstrap_schema(&pool).await.expect("second bootstrap");
}

#[tokio::test]
async fn file_database_is_created_with_parent_dirs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("arena.db");
    let pool = db::connect(&path).await.expect("file db");
    drop(pool);
    assert!(path.exists());
}

#[tokio::test]
async fn pid_requires_active_dev_server_status() {
    let pool = db::connect_memory().await.expect("memory db");
    let result = sqlx::query(
        "INSERT INTO session (directory, model_id, provider_id, starter_template, status,
                              dev_server_status, dev_server_pid, created_at, updated_at)
         VALUES ('/tmp/x', 'm', 'p', 't', 'ready', 'stopped', 42, 'now', 'now')",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err(), "stopped dev server with a pid must be rejected");
}
