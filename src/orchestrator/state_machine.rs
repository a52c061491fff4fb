//! Session state machine driven by lifecycle events.
//!
//! [`transition`] is the whole table: a pure, exhaustive mapping from an
//! event to the effect it has. [`StateMachine::apply`] performs that effect
//! against the database under the session's lock.

use tracing::{debug, info, info_span, Instrument};

use super::locks::KeyedLocks;
use crate::models::event::{EventKind, LifecycleEvent};
use crate::models::session::SessionStatus;
use crate::models::turn::TurnStatus;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::turn_repo::TurnRepo;
use crate::{AppError, Result};

/// Effect of one event on the durable session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Store the agent-side session id; status unchanged.
    RecordRemoteSession(String),
    /// Move to `status`, recording `error` for failure statuses.
    SetStatus {
        /// Target status.
        status: SessionStatus,
        /// Failure reason.
        error: Option<String>,
    },
    /// Open a pending turn (idempotently) and move to `prompting`.
    OpenTurn,
    /// Resolve the pending turn and move the session accordingly.
    CloseTurn {
        /// Outcome recorded on the turn.
        turn: TurnStatus,
        /// Target session status.
        status: SessionStatus,
        /// Failure reason.
        error: Option<String>,
    },
    /// Logged only; dev-server status belongs to the supervisor.
    Advisory,
}

/// The transition table.
#[must_use]
pub fn transition(kind: &EventKind) -> Transition {
    match kind {
        EventKind::AgentSessionCreated { remote_session_id } => {
            Transition::RecordRemoteSession(remote_session_id.clone())
        }
        EventKind::SetupStarted => Transition::SetStatus {
            status: SessionStatus::SetupPending,
            error: None,
        },
        EventKind::SetupFailed { error } => Transition::SetStatus {
            status: SessionStatus::Failed,
            error: Some(error.clone()),
        },
        EventKind::PromptStarted => Transition::OpenTurn,
        EventKind::PromptCompleted => Transition::CloseTurn {
            turn: TurnStatus::Completed,
            status: SessionStatus::Completed,
            error: None,
        },
        EventKind::PromptFailed { error } => Transition::CloseTurn {
            turn: TurnStatus::Failed,
            status: SessionStatus::Failed,
            error: Some(error.clone()),
        },
        EventKind::SetupCompleted
        | EventKind::DevServerStarted
        | EventKind::DevServerCompleted
        | EventKind::DevServerFailed { .. } => Transition::Advisory,
    }
}

/// Applies transitions to the session and turn tables.
pub struct StateMachine {
    sessions: SessionRepo,
    turns: TurnRepo,
    locks: KeyedLocks<i64>,
}

impl StateMachine {
    /// Create a state machine over the given repositories.
    #[must_use]
    pub fn new(sessions: SessionRepo, turns: TurnRepo) -> Self {
        Self {
            sessions,
            turns,
            locks: KeyedLocks::new(),
        }
    }

    /// Apply the event's transition and return it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session and
    /// `AppError::Db` if a write fails.
    pub async fn apply(&self, event: &LifecycleEvent) -> Result<Transition> {
        let session_id = event.session_id;
        let event_type = event.kind.wire_name();
        async move {
            let _guard = self.locks.lock(session_id).await;
            if self.sessions.get_by_id(session_id).await?.is_none() {
                return Err(AppError::NotFound(format!("session {session_id}")));
            }

            let step = transition(&event.kind);
            match &step {
                Transition::RecordRemoteSession(remote_id) => {
                    self.sessions
                        .set_remote_session_id(session_id, remote_id)
                        .await?;
                }
                Transition::SetStatus { status, error } => {
                    self.sessions
                        .update_status(session_id, *status, error.as_deref())
                        .await?;
                }
                Transition::OpenTurn => {
                    let turn = self.turns.open_pending(session_id).await?;
                    debug!(turn_id = turn.id, "turn open");
                    self.sessions
                        .update_status(session_id, SessionStatus::Prompting, None)
                        .await?;
                }
                Transition::CloseTurn {
                    turn,
                    status,
                    error,
                } => {
                    let closed = self
                        .turns
                        .close_pending(session_id, *turn, error.as_deref())
                        .await?;
                    if closed.is_none() {
                        debug!("no pending turn to close");
                    }
                    self.sessions
                        .update_status(session_id, *status, error.as_deref())
                        .await?;
                }
                Transition::Advisory => {}
            }
            info!(?step, "event applied");
            Ok(step)
        }
        .instrument(info_span!("apply_event", session_id, event_type))
        .await
    }
}
