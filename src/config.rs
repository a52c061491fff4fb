//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::ports::PortRange;
use crate::{AppError, Result};

/// Keychain service name used for credential lookups.
pub const KEYRING_SERVICE: &str = "agent-arena";

/// Port ranges handed out to execution environments and dev servers.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PortsConfig {
    /// Host ports for environment control APIs.
    #[serde(default = "default_control_range")]
    pub control_range: PortRange,
    /// Host ports for dev-server / preview traffic.
    #[serde(default = "default_app_range")]
    pub app_range: PortRange,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            control_range: default_control_range(),
            app_range: default_app_range(),
        }
    }
}

fn default_control_range() -> PortRange {
    PortRange::new(3005, 3025)
}

fn default_app_range() -> PortRange {
    PortRange::new(5173, 5183)
}

/// Execution environment (container) settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EnvironmentConfig {
    /// Whether a container runtime is available on this host.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Image every session environment is built from.
    #[serde(default = "default_image")]
    pub image: String,
    /// Container-side port of the in-environment control API.
    #[serde(default = "default_control_container_port")]
    pub control_container_port: u16,
    /// Container-side port of the dev server.
    #[serde(default = "default_app_container_port")]
    pub app_container_port: u16,
    /// Optional dotenv-style file whose entries are injected into environments.
    #[serde(default)]
    pub env_file: Option<PathBuf>,
    /// Agent API key injected as `AGENT_API_KEY` (populated at runtime).
    #[serde(skip)]
    pub agent_api_key: Option<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            image: default_image(),
            control_container_port: default_control_container_port(),
            app_container_port: default_app_container_port(),
            env_file: None,
            agent_api_key: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_image() -> String {
    "agent-arena-coderunner".into()
}

fn default_control_container_port() -> u16 {
    3000
}

fn default_app_container_port() -> u16 {
    5173
}

/// Coding-agent service connection settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Base URL of the agent service.
    #[serde(default = "default_agent_url")]
    pub base_url: String,
    /// Upper bound for a single agent request (prompts can be slow).
    #[serde(default = "default_agent_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: default_agent_url(),
            request_timeout_seconds: default_agent_timeout(),
        }
    }
}

fn default_agent_url() -> String {
    "http://127.0.0.1:4096".into()
}

fn default_agent_timeout() -> u64 {
    1800
}

/// Dev-server launch and supervision settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DevServerConfig {
    /// Program used to launch the dev server.
    #[serde(default = "default_dev_command")]
    pub command: String,
    /// Arguments placed before the port flag.
    #[serde(default = "default_dev_args")]
    pub args: Vec<String>,
    /// Flag that precedes the port number.
    #[serde(default = "default_port_flag")]
    pub port_flag: String,
    /// Regexes matched against stdout lines to detect readiness.
    #[serde(default = "default_ready_patterns")]
    pub ready_patterns: Vec<String>,
    /// Seconds to wait for a ready marker before assuming the server is up.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_seconds: u64,
    /// Milliseconds between the graceful and the forceful kill signal.
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            command: default_dev_command(),
            args: default_dev_args(),
            port_flag: default_port_flag(),
            ready_patterns: default_ready_patterns(),
            ready_timeout_seconds: default_ready_timeout(),
            grace_period_ms: default_grace_period(),
        }
    }
}

fn default_dev_command() -> String {
    "pnpm".into()
}

fn default_dev_args() -> Vec<String> {
    vec!["dev".into()]
}

fn default_port_flag() -> String {
    "--port".into()
}

fn default_ready_patterns() -> Vec<String> {
    vec!["Local:".into(), "localhost".into()]
}

fn default_ready_timeout() -> u64 {
    10
}

fn default_grace_period() -> u64 {
    500
}

/// Working-directory scaffolding settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ScaffoldConfig {
    /// Shell used to run the scaffold script.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Script invoked as `<shell> <script> <directory> <template>`.
    ///
    /// When absent the directory is only created.
    #[serde(default)]
    pub script: Option<PathBuf>,
    /// Starter templates accepted by the in-environment setup endpoint.
    #[serde(default = "default_templates")]
    pub templates: Vec<String>,
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            script: None,
            templates: default_templates(),
        }
    }
}

fn default_shell() -> String {
    "/usr/bin/bash".into()
}

fn default_templates() -> Vec<String> {
    vec!["react-ts-vite-tailwind-v4".into()]
}

/// Event bridge ingress settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Address the TCP ingress binds to.
    #[serde(default = "default_bridge_bind")]
    pub bind: String,
    /// Address environments use to reach the ingress.
    #[serde(default = "default_bridge_public")]
    pub public_addr: String,
    /// Broadcast buffer; slow listeners lose events beyond this depth.
    #[serde(default = "default_bridge_capacity")]
    pub capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: default_bridge_bind(),
            public_addr: default_bridge_public(),
            capacity: default_bridge_capacity(),
        }
    }
}

fn default_bridge_bind() -> String {
    "0.0.0.0:6390".into()
}

fn default_bridge_public() -> String {
    "host.docker.internal:6390".into()
}

fn default_bridge_capacity() -> usize {
    1024
}

fn default_http_port() -> u16 {
    4000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data").join("agent-arena.db")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// HTTP port for the orchestrator API.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Port ranges.
    #[serde(default)]
    pub ports: PortsConfig,
    /// Container runtime settings.
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// Agent service settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Dev-server supervision settings.
    #[serde(default)]
    pub dev_server: DevServerConfig,
    /// Scaffolding settings.
    #[serde(default)]
    pub scaffold: ScaffoldConfig,
    /// Event bridge settings.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the agent API key from OS keychain with env-var fallback.
    ///
    /// A missing key is not fatal: environments are created without it and
    /// the agent service is expected to be pre-authenticated.
    pub async fn load_credentials(&mut self) {
        match load_credential("agent_api_key", "AGENT_API_KEY").await {
            Ok(value) => self.environment.agent_api_key = Some(value),
            Err(err) => warn!(%err, "agent api key unavailable; environments start without it"),
        }
    }

    /// Readiness timeout for dev servers.
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.dev_server.ready_timeout_seconds)
    }

    /// Grace period between SIGTERM and SIGKILL.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.dev_server.grace_period_ms)
    }

    fn validate(&self) -> Result<()> {
        let ctrl = self.ports.control_range;
        let app = self.ports.app_range;

        if ctrl.is_empty() || app.is_empty() {
            return Err(AppError::Config(
                "port ranges must have start <= end".into(),
            ));
        }

        if ctrl.overlaps(&app) {
            return Err(AppError::Config(format!(
                "control range {ctrl} overlaps application range {app}"
            )));
        }

        if self.dev_server.command.trim().is_empty() {
            return Err(AppError::Config(
                "dev_server.command must not be empty".into(),
            ));
        }

        for pattern in &self.dev_server.ready_patterns {
            regex::Regex::new(pattern).map_err(|err| {
                AppError::Config(format!("invalid ready pattern '{pattern}': {err}"))
            })?;
        }

        if self.bridge.capacity == 0 {
            return Err(AppError::Config(
                "bridge.capacity must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
