//! Remote session driver.
//!
//! Runs the two halves of an agent invocation and reports progress as
//! lifecycle events: `setup` provisions the working directory and opens an
//! agent session, `execute` submits a prompt to it. Both halves publish a
//! failure event before returning an error, so listeners always see how a
//! step ended.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};

use super::agent::{AgentService, PromptRequest};
use super::scaffold::Scaffolder;
use crate::bridge::EventSink;
use crate::models::event::{EventKind, LifecycleEvent};
use crate::Result;

/// A prompt bound for an agent session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Prompt text.
    pub text: String,
    /// Provider of the model.
    pub provider_id: String,
    /// Model identifier.
    pub model_id: String,
}

/// Drives one session's agent work and emits its lifecycle events.
#[derive(Clone)]
pub struct SessionDriver {
    sink: Arc<dyn EventSink>,
    agent: Arc<dyn AgentService>,
    scaffolder: Scaffolder,
}

impl SessionDriver {
    /// Create a driver publishing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>, agent: Arc<dyn AgentService>, scaffolder: Scaffolder) -> Self {
        Self {
            sink,
            agent,
            scaffolder,
        }
    }

    /// Publish an event for `session_id`.
    pub async fn emit(&self, session_id: i64, kind: EventKind) {
        self.sink.publish(LifecycleEvent::new(session_id, kind)).await;
    }

    /// Scaffold `directory` from `template` and create the agent session.
    ///
    /// Emits `setup-started`, then `agent-session-created` and
    /// `setup-completed`, or `setup-failed` on the first error. Returns the
    /// agent-side session id.
    ///
    /// # Errors
    ///
    /// Propagates scaffolding and agent failures.
    pub async fn setup(&self, session_id: i64, directory: &Path, template: &str) -> Result<String> {
        let span = info_span!("session_setup", session_id, template);
        async move {
            self.emit(session_id, EventKind::SetupStarted).await;
            match self.setup_steps(session_id, directory, template).await {
                Ok(remote_session_id) => {
                    self.emit(session_id, EventKind::SetupCompleted).await;
                    info!(%remote_session_id, "setup completed");
                    Ok(remote_session_id)
                }
                Err(err) => {
                    warn!(%err, "setup failed");
                    self.emit(
                        session_id,
                        EventKind::SetupFailed {
                            error: err.to_string(),
                        },
                    )
                    .await;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn setup_steps(&self, session_id: i64, directory: &Path, template: &str) -> Result<String> {
        self.scaffolder.scaffold(directory, template).await?;
        self.open_remote_session(session_id, directory).await
    }

    /// Create an agent session bound to `directory` and emit
    /// `agent-session-created`.
    ///
    /// # Errors
    ///
    /// Returns the agent's failure; no event is emitted in that case.
    pub async fn open_remote_session(&self, session_id: i64, directory: &Path) -> Result<String> {
        let remote_session_id = self
            .agent
            .create_session(&directory.to_string_lossy())
            .await?;
        self.emit(
            session_id,
            EventKind::AgentSessionCreated {
                remote_session_id: remote_session_id.clone(),
            },
        )
        .await;
        Ok(remote_session_id)
    }

    /// Submit `prompt` to the agent session `remote_session_id`.
    ///
    /// Emits `prompt-started`, then `prompt-completed` or `prompt-failed`.
    ///
    /// # Errors
    ///
    /// Returns the agent's failure.
    pub async fn execute(
        &self,
        session_id: i64,
        remote_session_id: &str,
        directory: &Path,
        prompt: Prompt,
    ) -> Result<()> {
        let span = info_span!("session_execute", session_id, model = %prompt.model_id);
        async move {
            self.emit(session_id, EventKind::PromptStarted).await;
            let request = PromptRequest {
                remote_session_id: remote_session_id.to_owned(),
                directory: directory.to_string_lossy().into_owned(),
                text: prompt.text,
                provider_id: prompt.provider_id,
                model_id: prompt.model_id,
            };
            match self.agent.prompt(request).await {
                Ok(()) => {
                    self.emit(session_id, EventKind::PromptCompleted).await;
                    info!("prompt completed");
                    Ok(())
                }
                Err(err) => {
                    warn!(%err, "prompt failed");
                    self.emit(
                        session_id,
                        EventKind::PromptFailed {
                            error: err.to_string(),
                        },
                    )
                    .await;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }
}
