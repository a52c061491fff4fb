//! Turn repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::turn::{Turn, TurnStatus};
use crate::{AppError, Result};

use super::db::Database;
use super::parse_timestamp;

/// Repository for turn records.
#[derive(Clone)]
pub struct TurnRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct TurnRow {
    id: i64,
    session_id: i64,
    start_time: String,
    end_time: Option<String>,
    status: String,
    error: Option<String>,
}

impl TurnRow {
    fn into_turn(self) -> Result<Turn> {
        Ok(Turn {
            id: self.id,
            session_id: self.session_id,
            start_time: parse_timestamp("start_time", &self.start_time)?,
            end_time: self
                .end_time
                .as_deref()
                .map(|t| parse_timestamp("end_time", t))
                .transpose()?,
            status: TurnStatus::parse(&self.status)?,
            error: self.error,
        })
    }
}

impl TurnRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open a pending turn for the session unless one is already pending.
    ///
    /// Returns the pending turn either way, so a replayed `prompt-started`
    /// never produces a second open turn.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert or lookup fails.
    pub async fn open_pending(&self, session_id: i64) -> Result<Turn> {
        sqlx::query(
            "INSERT INTO turn (session_id, start_time, status)
             SELECT ?1, ?2, 'pending'
             WHERE NOT EXISTS (
                 SELECT 1 FROM turn WHERE session_id = ?1 AND status = 'pending'
             )",
        )
        .bind(session_id)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        self.latest_pending(session_id)
            .await?
            .ok_or_else(|| AppError::Db(format!("no pending turn for session {session_id}")))
    }

    /// Resolve the most recent pending turn. Returns `None` when no turn
    /// is pending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn close_pending(
        &self,
        session_id: i64,
        status: TurnStatus,
        error: Option<&str>,
    ) -> Result<Option<Turn>> {
        let Some(pending) = self.latest_pending(session_id).await? else {
            return Ok(None);
        };

        sqlx::query("UPDATE turn SET status = ?1, end_time = ?2, error = ?3 WHERE id = ?4")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(error)
            .bind(pending.id)
            .execute(self.db.as_ref())
            .await?;

        self.get_by_id(pending.id).await
    }

    /// Retrieve a turn by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Turn>> {
        let row: Option<TurnRow> = sqlx::query_as(
            "SELECT id, session_id, start_time, end_time, status, error FROM turn WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(TurnRow::into_turn).transpose()
    }

    /// All turns of a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_session(&self, session_id: i64) -> Result<Vec<Turn>> {
        let rows: Vec<TurnRow> = sqlx::query_as(
            "SELECT id, session_id, start_time, end_time, status, error
             FROM turn WHERE session_id = ?1 ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(TurnRow::into_turn).collect()
    }

    async fn latest_pending(&self, session_id: i64) -> Result<Option<Turn>> {
        let row: Option<TurnRow> = sqlx::query_as(
            "SELECT id, session_id, start_time, end_time, status, error
             FROM turn WHERE session_id = ?1 AND status = 'pending'
             ORDER BY id DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(TurnRow::into_turn).transpose()
    }
}
