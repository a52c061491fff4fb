//! `SQLite` schema bootstrap logic.
//!
//! All definitions use `IF NOT EXISTS` and are re-applied on every start.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS batch (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT,
    prompt          TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id            INTEGER REFERENCES batch(id),
    directory           TEXT NOT NULL,
    model_id            TEXT NOT NULL,
    provider_id         TEXT NOT NULL,
    starter_template    TEXT NOT NULL,
    status              TEXT NOT NULL CHECK(status IN ('uninitialized','setup_pending','setup_failed','ready','prompting','completed','failed')),
    error               TEXT,
    remote_session_id   TEXT,
    port                INTEGER UNIQUE,
    dev_server_status   TEXT NOT NULL CHECK(dev_server_status IN ('stopped','starting','running','error')),
    dev_server_pid      INTEGER,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    CHECK(dev_server_pid IS NULL OR dev_server_status IN ('starting','running'))
);

CREATE TABLE IF NOT EXISTS turn (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id      INTEGER NOT NULL REFERENCES session(id),
    start_time      TEXT NOT NULL,
    end_time        TEXT,
    status          TEXT NOT NULL CHECK(status IN ('pending','completed','failed')),
    error           TEXT
);

CREATE TABLE IF NOT EXISTS environment (
    session_id      INTEGER PRIMARY KEY NOT NULL REFERENCES session(id),
    environment_id  TEXT NOT NULL UNIQUE,
    control_port    INTEGER NOT NULL UNIQUE,
    app_port        INTEGER NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_batch ON session(batch_id);
CREATE INDEX IF NOT EXISTS idx_turn_session ON turn(session_id, status);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
