//! Full session run: setup, prompt, then dev server.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use super::driver::{Prompt, SessionDriver};
use super::runs::RunPermit;
use crate::models::event::EventKind;
use crate::models::session::Session;
use crate::ports::reservation::PortReservations;
use crate::supervisor::{DevServer, ProcessSupervisor};
use crate::AppError;

/// Step at which a run stopped.
#[derive(Debug)]
pub enum RunFailure {
    /// Scaffolding or agent session creation failed.
    Setup(AppError),
    /// The agent rejected or failed the prompt.
    Prompt(AppError),
    /// The dev server did not come up.
    DevServer(AppError),
}

impl Display for RunFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup(err) => write!(f, "setup failed: {err}"),
            Self::Prompt(err) => write!(f, "prompt failed: {err}"),
            Self::DevServer(err) => write!(f, "dev server failed: {err}"),
        }
    }
}

impl std::error::Error for RunFailure {}

/// Runs complete session lifecycles in the background.
#[derive(Clone)]
pub struct LifecycleRunner {
    driver: SessionDriver,
    supervisor: ProcessSupervisor,
    reservations: Arc<PortReservations>,
}

impl LifecycleRunner {
    /// Create a runner.
    #[must_use]
    pub fn new(
        driver: SessionDriver,
        supervisor: ProcessSupervisor,
        reservations: Arc<PortReservations>,
    ) -> Self {
        Self {
            driver,
            supervisor,
            reservations,
        }
    }

    /// Run every step for `session` in order, stopping at the first
    /// failure. The session's port is released when any step fails.
    ///
    /// # Errors
    ///
    /// Returns the failed step with its cause.
    pub async fn run_session_lifecycle(
        &self,
        session: &Session,
        message: &str,
        port: u16,
    ) -> std::result::Result<DevServer, RunFailure> {
        let result = self.run_steps(session, message, port).await;
        if let Err(failure) = &result {
            warn!(session_id = session.id, %failure, "session run failed");
            if let Err(err) = self.reservations.release_port(session.id).await {
                error!(session_id = session.id, %err, "failed to release port after run failure");
            }
        }
        result
    }

    async fn run_steps(
        &self,
        session: &Session,
        message: &str,
        port: u16,
    ) -> std::result::Result<DevServer, RunFailure> {
        let directory = PathBuf::from(&session.directory);
        let remote_session_id = self
            .driver
            .setup(session.id, &directory, &session.starter_template)
            .await
            .map_err(RunFailure::Setup)?;

        let prompt = Prompt {
            text: message.to_owned(),
            provider_id: session.provider_id.clone(),
            model_id: session.model_id.clone(),
        };
        self.driver
            .execute(session.id, &remote_session_id, &directory, prompt)
            .await
            .map_err(RunFailure::Prompt)?;

        match self.supervisor.start(session.id, &directory, port).await {
            Ok(server) => {
                self.driver.emit(session.id, EventKind::DevServerStarted).await;
                Ok(server)
            }
            Err(err) => {
                self.driver
                    .emit(
                        session.id,
                        EventKind::DevServerFailed {
                            error: err.to_string(),
                        },
                    )
                    .await;
                Err(RunFailure::DevServer(err))
            }
        }
    }

    /// Run the lifecycle as a background task. The run slot held by
    /// `permit` is released when the task ends.
    pub fn spawn(&self, session: Session, message: String, port: u16, permit: RunPermit) -> JoinHandle<()> {
        let runner = self.clone();
        let span = info_span!("session_run", session_id = session.id, port);
        tokio::spawn(
            async move {
                let _permit = permit;
                if let Ok(server) = runner.run_session_lifecycle(&session, &message, port).await {
                    info!(pid = server.pid, "session run finished");
                }
            }
            .instrument(span),
        )
    }
}
