//! Batch repository. The core only reads a batch's prompt; `create`
//! exists for seeding.

use std::sync::Arc;

use chrono::Utc;

use crate::models::batch::Batch;
use crate::{AppError, Result};

use super::db::Database;
use super::parse_timestamp;

/// Repository for batch records.
#[derive(Clone)]
pub struct BatchRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct BatchRow {
    id: i64,
    name: Option<String>,
    prompt: Option<String>,
    created_at: String,
}

impl BatchRow {
    fn into_batch(self) -> Result<Batch> {
        Ok(Batch {
            id: self.id,
            name: self.name,
            prompt: self.prompt,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

impl BatchRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a batch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, name: Option<&str>, prompt: Option<&str>) -> Result<Batch> {
        let result = sqlx::query("INSERT INTO batch (name, prompt, created_at) VALUES (?1, ?2, ?3)")
            .bind(name)
            .bind(prompt)
            .bind(Utc::now().to_rfc3339())
            .execute(self.db.as_ref())
            .await?;

        let id = result.last_insert_rowid();
        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::Db(format!("batch {id} vanished after insert")))
    }

    /// Retrieve a batch by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Batch>> {
        let row: Option<BatchRow> =
            sqlx::query_as("SELECT id, name, prompt, created_at FROM batch WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.as_ref())
                .await?;
        row.map(BatchRow::into_batch).transpose()
    }
}
