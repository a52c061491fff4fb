//! Session ↔ execution environment correlation records.

use std::sync::Arc;

use crate::models::environment::EnvironmentRecord;
use crate::{AppError, Result};

use super::db::Database;
use super::parse_timestamp;

/// Repository for environment correlation records.
#[derive(Clone)]
pub struct EnvironmentRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct EnvironmentRow {
    session_id: i64,
    environment_id: String,
    control_port: i64,
    app_port: i64,
    created_at: String,
}

impl EnvironmentRow {
    fn into_record(self) -> Result<EnvironmentRecord> {
        Ok(EnvironmentRecord {
            session_id: self.session_id,
            environment_id: self.environment_id,
            control_port: to_port(self.control_port)?,
            app_port: to_port(self.app_port)?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

fn to_port(value: i64) -> Result<u16> {
    u16::try_from(value).map_err(|_| AppError::Db(format!("invalid port: {value}")))
}

impl EnvironmentRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a correlation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails, including when the
    /// session already has an environment.
    pub async fn insert(&self, record: &EnvironmentRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO environment (session_id, environment_id, control_port, app_port, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(record.session_id)
        .bind(&record.environment_id)
        .bind(i64::from(record.control_port))
        .bind(i64::from(record.app_port))
        .bind(record.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Correlation for `session_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_session(&self, session_id: i64) -> Result<Option<EnvironmentRecord>> {
        let row: Option<EnvironmentRow> = sqlx::query_as(
            "SELECT session_id, environment_id, control_port, app_port, created_at
             FROM environment WHERE session_id = ?1",
        )
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(EnvironmentRow::into_record).transpose()
    }

    /// Every host port recorded for any environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn recorded_ports(&self) -> Result<Vec<u16>> {
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT control_port, app_port FROM environment")
                .fetch_all(self.db.as_ref())
                .await?;
        Ok(rows
            .into_iter()
            .flat_map(|(control, app)| [control, app])
            .filter_map(|p| u16::try_from(p).ok())
            .collect())
    }
}
