//! Execution environment correlation and runtime view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable link between a session and its execution environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRecord {
    /// Owning session.
    pub session_id: i64,
    /// Runtime identifier of the environment.
    pub environment_id: String,
    /// Host port bound to the environment's control API.
    pub control_port: u16,
    /// Host port bound to the environment's dev server.
    pub app_port: u16,
    /// When the correlation was recorded.
    pub created_at: DateTime<Utc>,
}

/// Runtime state of an environment as reported by the container runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    /// Runtime identifier.
    pub id: String,
    /// Whether the environment is currently running.
    pub running: bool,
    /// Runtime status text (`running`, `created`, `exited`, ...).
    pub status: String,
    /// Host ports bound by the environment.
    pub host_ports: Vec<u16>,
}

/// Result of `ensure_environment`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnsuredEnvironment {
    /// Runtime identifier.
    pub environment_id: String,
    /// Host control port.
    pub control_port: u16,
    /// Host application port.
    pub app_port: u16,
    /// `true` when this call created the environment.
    pub created: bool,
}
