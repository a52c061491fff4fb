//! In-environment control API.
//!
//! Runs inside each execution environment. `/setup` and `/execute`
//! validate their input, answer immediately, and carry on in the
//! background, reporting progress to the orchestrator's event bridge.

pub mod server;

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::Mutex;

use crate::orchestrator::driver::SessionDriver;

/// Settings of the control API.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Working directory every session in this environment uses.
    pub code_dir: PathBuf,
    /// Accepted starter templates.
    pub templates: Vec<String>,
    /// Provider used when `/execute` names none.
    pub default_provider: String,
}

/// Shared state of the control API.
pub struct RunnerState {
    config: RunnerConfig,
    driver: SessionDriver,
    remote_sessions: Mutex<HashMap<i64, String>>,
}

impl RunnerState {
    /// Build the state.
    #[must_use]
    pub fn new(config: RunnerConfig, driver: SessionDriver) -> Self {
        Self {
            config,
            driver,
            remote_sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Agent session opened by `/setup` for `session_id`, if any.
    pub async fn remote_session(&self, session_id: i64) -> Option<String> {
        self.remote_sessions.lock().await.get(&session_id).cloned()
    }

    async fn remember(&self, session_id: i64, remote_session_id: String) {
        self.remote_sessions
            .lock()
            .await
            .insert(session_id, remote_session_id);
    }
}
