//! Turn model: one prompt-submission attempt within a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppError;

/// Outcome of a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Prompt submitted, no response yet.
    Pending,
    /// The agent returned a successful envelope.
    Completed,
    /// The agent returned an error or the call failed.
    Failed,
}

impl TurnStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub(crate) fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::Db(format!("invalid turn status: {other}"))),
        }
    }
}

/// Turn domain entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    /// Database identifier.
    pub id: i64,
    /// Owning session.
    pub session_id: i64,
    /// When the prompt was about to be sent.
    pub start_time: DateTime<Utc>,
    /// When the agent answered.
    pub end_time: Option<DateTime<Utc>>,
    /// Outcome.
    pub status: TurnStatus,
    /// Failure reason.
    pub error: Option<String>,
}
