//! Batch model. Batches group sessions that share a prompt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Batch domain entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Database identifier.
    pub id: i64,
    /// Display name.
    pub name: Option<String>,
    /// Prompt used when a run request carries no message.
    pub prompt: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
