//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::session::{
    DevServerStatus, NewSession, Session, SessionStatus, DEFAULT_TEMPLATE,
};
use crate::{AppError, Result};

use super::db::Database;
use super::parse_timestamp;

const SESSION_COLUMNS: &str = "id, batch_id, directory, model_id, provider_id, starter_template, \
     status, error, remote_session_id, port, dev_server_status, dev_server_pid, \
     created_at, updated_at";

/// Outcome of a conditional port claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortClaim {
    /// The port is now reserved by the session.
    Claimed,
    /// The session already held a port; nothing was written.
    AlreadyHeld,
    /// Another session holds the port.
    Taken,
}

/// Repository for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    batch_id: Option<i64>,
    directory: String,
    model_id: String,
    provider_id: String,
    starter_template: String,
    status: String,
    error: Option<String>,
    remote_session_id: Option<String>,
    port: Option<i64>,
    dev_server_status: String,
    dev_server_pid: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let port = self
            .port
            .map(|p| u16::try_from(p).map_err(|_| AppError::Db(format!("invalid port: {p}"))))
            .transpose()?;
        let dev_server_pid = self
            .dev_server_pid
            .map(|p| u32::try_from(p).map_err(|_| AppError::Db(format!("invalid pid: {p}"))))
            .transpose()?;

        Ok(Session {
            id: self.id,
            batch_id: self.batch_id,
            directory: self.directory,
            model_id: self.model_id,
            provider_id: self.provider_id,
            starter_template: self.starter_template,
            status: self.status.parse()?,
            error: self.error,
            remote_session_id: self.remote_session_id,
            port,
            dev_server_status: self.dev_server_status.parse()?,
            dev_server_pid,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session in `uninitialized` / `stopped` state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, new: &NewSession) -> Result<Session> {
        let now = Utc::now().to_rfc3339();
        let template = new.starter_template.as_deref().unwrap_or(DEFAULT_TEMPLATE);

        let result = sqlx::query(
            "INSERT INTO session (batch_id, directory, model_id, provider_id, starter_template,
                                  status, dev_server_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        )
        .bind(new.batch_id)
        .bind(&new.directory)
        .bind(&new.model_id)
        .bind(&new.provider_id)
        .bind(template)
        .bind(SessionStatus::Uninitialized.as_str())
        .bind(DevServerStatus::Stopped.as_str())
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;

        let id = result.last_insert_rowid();
        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::Db(format!("session {id} vanished after insert")))
    }

    /// Retrieve a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM session WHERE id = ?1");
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(SessionRow::into_session).transpose()
    }

    /// Retrieve a session or fail with `NotFound`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown ids, `AppError::Db` on query failure.
    pub async fn require(&self, id: i64) -> Result<Session> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id}")))
    }

    /// Set the lifecycle status. The error message is kept only for
    /// failure statuses; any other status clears it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_status(
        &self,
        id: i64,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let error = if status.is_failure() { error } else { None };
        sqlx::query("UPDATE session SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(status.as_str())
            .bind(error)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Record the agent-side session identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_remote_session_id(&self, id: i64, remote_session_id: &str) -> Result<()> {
        sqlx::query("UPDATE session SET remote_session_id = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(remote_session_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Set the dev server status. The process id is stored only while the
    /// status is `starting` or `running`; it is cleared otherwise.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_dev_server(
        &self,
        id: i64,
        status: DevServerStatus,
        pid: Option<u32>,
    ) -> Result<()> {
        let pid = if status.is_active() { pid } else { None };
        sqlx::query(
            "UPDATE session SET dev_server_status = ?1, dev_server_pid = ?2, updated_at = ?3
             WHERE id = ?4",
        )
        .bind(status.as_str())
        .bind(pid.map(i64::from))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Reserve `port` for the session if it holds none yet.
    ///
    /// The unique index on `port` arbitrates concurrent claims: a losing
    /// writer observes [`PortClaim::Taken`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` for failures other than the unique conflict.
    pub async fn claim_port(&self, id: i64, port: u16) -> Result<PortClaim> {
        let outcome = sqlx::query(
            "UPDATE session SET port = ?1, updated_at = ?2 WHERE id = ?3 AND port IS NULL",
        )
        .bind(i64::from(port))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.as_ref())
        .await;

        match outcome {
            Ok(result) if result.rows_affected() == 1 => Ok(PortClaim::Claimed),
            Ok(_) => Ok(PortClaim::AlreadyHeld),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(PortClaim::Taken),
            Err(err) => Err(err.into()),
        }
    }

    /// Clear the session's port reservation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn release_port(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE session SET port = NULL, updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Every port currently reserved by a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn reserved_ports(&self) -> Result<Vec<u16>> {
        let ports: Vec<i64> =
            sqlx::query_scalar("SELECT port FROM session WHERE port IS NOT NULL ORDER BY port")
                .fetch_all(self.db.as_ref())
                .await?;
        Ok(ports
            .into_iter()
            .filter_map(|p| u16::try_from(p).ok())
            .collect())
    }

    /// Sessions whose dev server is `starting` or `running`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_dev_server_active(&self) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM session
             WHERE dev_server_status IN ('starting', 'running')
             ORDER BY id"
        );
        let rows: Vec<SessionRow> = sqlx::query_as(&sql).fetch_all(self.db.as_ref()).await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }
}
