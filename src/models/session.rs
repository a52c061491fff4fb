//! Session model and status enumerations.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppError;

/// Starter template assigned when a session does not name one.
pub const DEFAULT_TEMPLATE: &str = "react-ts-vite-tailwind-v4";

/// Lifecycle status of an agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created by the batch workflow, nothing has run yet.
    Uninitialized,
    /// Working directory is being provisioned.
    SetupPending,
    /// Provisioning failed.
    SetupFailed,
    /// Remote agent session exists and can accept a prompt.
    Ready,
    /// A prompt is in flight.
    Prompting,
    /// The prompt completed.
    Completed,
    /// The prompt or a later step failed.
    Failed,
}

impl SessionStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Uninitialized,
        Self::SetupPending,
        Self::SetupFailed,
        Self::Ready,
        Self::Prompting,
        Self::Completed,
        Self::Failed,
    ];

    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::SetupPending => "setup_pending",
            Self::SetupFailed => "setup_failed",
            Self::Ready => "ready",
            Self::Prompting => "prompting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the status may carry an `error` message.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::SetupFailed | Self::Failed)
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::Db(format!("invalid session status: {s}")))
    }
}

/// Status of the dev server owned by the process supervisor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DevServerStatus {
    /// No process.
    Stopped,
    /// Spawned, waiting for readiness.
    Starting,
    /// Ready (or assumed ready after the timeout).
    Running,
    /// Failed to start or exited abnormally.
    Error,
}

impl DevServerStatus {
    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Error => "error",
        }
    }

    /// Whether a process is expected to exist in this state.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl Display for DevServerStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DevServerStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(Self::Stopped),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "error" => Ok(Self::Error),
            other => Err(AppError::Db(format!("invalid dev server status: {other}"))),
        }
    }
}

/// Session domain entity persisted in `SQLite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Database identifier.
    pub id: i64,
    /// Owning batch, if any.
    pub batch_id: Option<i64>,
    /// Working directory of the agent and the dev server.
    pub directory: String,
    /// Model identifier passed to the agent.
    pub model_id: String,
    /// Provider identifier passed to the agent.
    pub provider_id: String,
    /// Starter template used during setup.
    pub starter_template: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Human-readable failure reason; only set in failure states.
    pub error: Option<String>,
    /// Agent-side session identifier once it exists.
    pub remote_session_id: Option<String>,
    /// Reserved application port.
    pub port: Option<u16>,
    /// Dev server status.
    pub dev_server_status: DevServerStatus,
    /// Dev server process id while starting/running.
    pub dev_server_pid: Option<u32>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    /// Owning batch, if any.
    pub batch_id: Option<i64>,
    /// Working directory.
    pub directory: String,
    /// Model identifier.
    pub model_id: String,
    /// Provider identifier.
    pub provider_id: String,
    /// Starter template; defaults to [`DEFAULT_TEMPLATE`].
    pub starter_template: Option<String>,
}

impl NewSession {
    /// Session for `provider_id/model_id` working in `directory`.
    #[must_use]
    pub fn new(
        directory: impl Into<String>,
        model_id: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            batch_id: None,
            directory: directory.into(),
            model_id: model_id.into(),
            provider_id: provider_id.into(),
            starter_template: None,
        }
    }

    /// Attach the session to a batch.
    #[must_use]
    pub fn in_batch(mut self, batch_id: i64) -> Self {
        self.batch_id = Some(batch_id);
        self
    }
}
