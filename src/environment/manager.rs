//! Environment lifecycle: create-once per session, bind ports, start
//! asynchronously.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::env_file;
use super::runtime::{ContainerRuntime, EnvironmentSpec};
use crate::config::{EnvironmentConfig, GlobalConfig};
use crate::models::environment::{EnsuredEnvironment, EnvironmentInfo, EnvironmentRecord};
use crate::orchestrator::locks::KeyedLocks;
use crate::persistence::environment_repo::EnvironmentRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::ports::reservation::PortReservations;
use crate::{AppError, Result};

/// Creates, correlates and inspects per-session execution environments.
pub struct EnvironmentManager {
    runtime: Arc<dyn ContainerRuntime>,
    reservations: Arc<PortReservations>,
    environments: EnvironmentRepo,
    sessions: SessionRepo,
    settings: EnvironmentConfig,
    injected: Vec<(String, String)>,
    locks: KeyedLocks<i64>,
}

impl EnvironmentManager {
    /// Build the manager. The env file, when configured, is read once here
    /// so a missing file fails at startup rather than on first use.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configured env file cannot be read.
    pub fn new(
        config: &GlobalConfig,
        runtime: Arc<dyn ContainerRuntime>,
        reservations: Arc<PortReservations>,
        environments: EnvironmentRepo,
        sessions: SessionRepo,
    ) -> Result<Self> {
        let mut injected = match &config.environment.env_file {
            Some(path) => env_file::load(path)?,
            None => Vec::new(),
        };
        injected.push(("BRIDGE_ADDR".into(), config.bridge.public_addr.clone()));
        if let Some(key) = &config.environment.agent_api_key {
            injected.push(("AGENT_API_KEY".into(), key.clone()));
        }

        Ok(Self {
            runtime,
            reservations,
            environments,
            sessions,
            settings: config.environment.clone(),
            injected,
            locks: KeyedLocks::new(),
        })
    }

    /// Return the session's environment, creating it if none exists.
    ///
    /// Idempotent: a session that already has a recorded environment never
    /// triggers another create. The correlation is persisted before the
    /// start request is issued; start runs in the background and its
    /// failure is only logged.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session,
    /// `AppError::Capacity` when either range is exhausted, and
    /// `AppError::Container` if creation fails.
    pub async fn ensure_environment(&self, session_id: i64) -> Result<EnsuredEnvironment> {
        async move {
            let _session_guard = self.locks.lock(session_id).await;

            if let Some(existing) = self.environments.get_by_session(session_id).await? {
                debug!(environment_id = %existing.environment_id, "environment already exists");
                return Ok(EnsuredEnvironment {
                    environment_id: existing.environment_id,
                    control_port: existing.control_port,
                    app_port: existing.app_port,
                    created: false,
                });
            }

            let session = self.sessions.require(session_id).await?;
            let scope = self.reservations.begin().await;
            let app_port = scope.claim_app_port(session_id).await?;
            // A port claimed here is given back if the environment never exists.
            let claimed_here = session.port.is_none();

            let created = match scope.control_port().await {
                Ok(control_port) => {
                    let spec = self.spec_for(session_id, control_port, app_port);
                    self.create_replacing_orphan(spec).await.map(|id| (id, control_port))
                }
                Err(err) => Err(err),
            };
            let (environment_id, control_port) = match created {
                Ok(created) => created,
                Err(err) => {
                    if claimed_here {
                        self.sessions.release_port(session_id).await?;
                    }
                    return Err(err);
                }
            };

            self.environments
                .insert(&EnvironmentRecord {
                    session_id,
                    environment_id: environment_id.clone(),
                    control_port,
                    app_port,
                    created_at: Utc::now(),
                })
                .await?;
            drop(scope);

            info!(%environment_id, control_port, app_port, "environment created");
            self.start_in_background(environment_id.clone());

            Ok(EnsuredEnvironment {
                environment_id,
                control_port,
                app_port,
                created: true,
            })
        }
        .instrument(info_span!("ensure_environment", session_id))
        .await
    }

    /// Runtime view of an environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the runtime does not know the id.
    pub async fn inspect(&self, environment_id: &str) -> Result<EnvironmentInfo> {
        self.runtime.inspect(environment_id).await
    }

    /// The session's correlation record, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the lookup fails.
    pub async fn record_for(&self, session_id: i64) -> Result<Option<EnvironmentRecord>> {
        self.environments.get_by_session(session_id).await
    }

    /// Host control port of the session's running environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the session has no environment and
    /// `AppError::Conflict` when it exists but is not running.
    pub async fn control_port(&self, session_id: i64) -> Result<u16> {
        let record = self.record_for(session_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("no environment for session {session_id}"))
        })?;
        let info = self.inspect(&record.environment_id).await?;
        if !info.running {
            return Err(AppError::Conflict(format!(
                "environment for session {session_id} is not running ({})",
                info.status
            )));
        }
        Ok(record.control_port)
    }

    /// Create the environment. A same-named environment without a
    /// correlation record is left over from an interrupted ensure; it is
    /// removed and creation retried once.
    async fn create_replacing_orphan(&self, spec: EnvironmentSpec) -> Result<String> {
        match self.runtime.create(spec.clone()).await {
            Err(AppError::Conflict(reason)) => {
                warn!(name = %spec.name, %reason, "removing orphaned environment");
                self.runtime.remove(&spec.name).await?;
                self.runtime.create(spec).await
            }
            other => other,
        }
    }

    fn spec_for(&self, session_id: i64, control_port: u16, app_port: u16) -> EnvironmentSpec {
        let mut env: Vec<String> = self
            .injected
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        env.push(format!("SESSION_ID={session_id}"));

        EnvironmentSpec {
            name: format!("agent-arena-session-{session_id}"),
            image: self.settings.image.clone(),
            env,
            port_bindings: vec![
                (self.settings.control_container_port, control_port),
                (self.settings.app_container_port, app_port),
            ],
        }
    }

    fn start_in_background(&self, environment_id: String) {
        let runtime = Arc::clone(&self.runtime);
        let span = info_span!("start_environment", %environment_id);
        tokio::spawn(
            async move {
                match runtime.start(&environment_id).await {
                    Ok(()) => info!("environment started"),
                    Err(err) => warn!(%err, "environment failed to start"),
                }
            }
            .instrument(span),
        );
    }
}

