//! Lifecycle events exchanged over the event bridge.
//!
//! Events travel as one JSON object per line:
//! `{"sessionId": 7, "type": "prompt-started", "error": null}`.
//! Decoding is lenient about the envelope (numeric or string session ids,
//! legacy dotted type names) and strict about the vocabulary: anything
//! outside the closed [`EventKind`] set decodes to `None`.

use serde::{Deserialize, Serialize};

/// Closed set of lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// The coding agent created its own session for this one.
    AgentSessionCreated {
        /// Agent-side session identifier.
        remote_session_id: String,
    },
    /// Working directory provisioning began.
    SetupStarted,
    /// Working directory provisioning finished.
    SetupCompleted,
    /// Provisioning or agent session creation failed.
    SetupFailed {
        /// Failure reason.
        error: String,
    },
    /// A prompt is about to be submitted.
    PromptStarted,
    /// The agent answered successfully.
    PromptCompleted,
    /// The agent answered with an error or could not be reached.
    PromptFailed {
        /// Failure reason.
        error: String,
    },
    /// The dev server was started after a successful prompt.
    DevServerStarted,
    /// The dev server exited cleanly.
    DevServerCompleted,
    /// The dev server could not be started.
    DevServerFailed {
        /// Failure reason.
        error: String,
    },
}

impl EventKind {
    /// Canonical wire name.
    #[must_use]
    pub const fn wire_name(&self) -> &'static str {
        match self {
            Self::AgentSessionCreated { .. } => "agent-session-created",
            Self::SetupStarted => "setup-started",
            Self::SetupCompleted => "setup-completed",
            Self::SetupFailed { .. } => "setup-failed",
            Self::PromptStarted => "prompt-started",
            Self::PromptCompleted => "prompt-completed",
            Self::PromptFailed { .. } => "prompt-failed",
            Self::DevServerStarted => "dev-server-started",
            Self::DevServerCompleted => "dev-server-completed",
            Self::DevServerFailed { .. } => "dev-server-failed",
        }
    }

    fn error(&self) -> Option<&str> {
        match self {
            Self::SetupFailed { error }
            | Self::PromptFailed { error }
            | Self::DevServerFailed { error } => Some(error),
            _ => None,
        }
    }
}

/// A decoded lifecycle event addressed to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// Target session.
    pub session_id: i64,
    /// What happened.
    pub kind: EventKind,
}

impl LifecycleEvent {
    /// Build an event for `session_id`.
    #[must_use]
    pub const fn new(session_id: i64, kind: EventKind) -> Self {
        Self { session_id, kind }
    }

    /// Encode into the wire envelope.
    #[must_use]
    pub fn to_wire(&self) -> WireEvent {
        let remote_session_id = match &self.kind {
            EventKind::AgentSessionCreated { remote_session_id } => {
                Some(remote_session_id.clone())
            }
            _ => None,
        };
        WireEvent {
            session_id: WireSessionId::Number(self.session_id),
            event_type: self.kind.wire_name().to_owned(),
            error: self.kind.error().map(str::to_owned),
            remote_session_id,
        }
    }

    /// Encode as a single JSON line (without the trailing newline).
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_wire())
    }

    /// Decode one JSON line. Malformed payloads and unknown event types
    /// yield `None`.
    #[must_use]
    pub fn from_json(line: &str) -> Option<Self> {
        serde_json::from_str::<WireEvent>(line)
            .ok()
            .and_then(WireEvent::into_event)
    }
}

/// Session id as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum WireSessionId {
    /// Numeric id (canonical).
    Number(i64),
    /// Stringified id, sent by some publishers.
    Text(String),
}

impl WireSessionId {
    /// Numeric value, if the id is (or parses as) an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// JSON envelope of a lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    /// Target session.
    pub session_id: WireSessionId,
    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Failure reason for `*-failed` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Agent-side session id for `agent-session-created`.
    #[serde(
        default,
        alias = "opencodeSessionId",
        skip_serializing_if = "Option::is_none"
    )]
    pub remote_session_id: Option<String>,
}

impl WireEvent {
    /// Map the envelope onto the closed event vocabulary.
    #[must_use]
    pub fn into_event(self) -> Option<LifecycleEvent> {
        let session_id = self.session_id.as_i64()?;
        let error = || {
            self.error
                .clone()
                .unwrap_or_else(|| "unknown error".to_owned())
        };
        let kind = match self.event_type.as_str() {
            "agent-session-created" | "opencode.session.created" => {
                EventKind::AgentSessionCreated {
                    remote_session_id: self.remote_session_id.clone()?,
                }
            }
            "setup-started" | "session.setup.started" => EventKind::SetupStarted,
            "setup-completed" | "session.setup.completed" => EventKind::SetupCompleted,
            "setup-failed" | "session.setup.failed" => EventKind::SetupFailed { error: error() },
            "prompt-started" | "session.prompt.started" => EventKind::PromptStarted,
            "prompt-completed" | "session.prompt.completed" => EventKind::PromptCompleted,
            "prompt-failed" | "session.prompt.failed" => EventKind::PromptFailed { error: error() },
            "dev-server-started" | "session.dev-server.started" => EventKind::DevServerStarted,
            "dev-server-completed" | "session.dev-server.completed" => {
                EventKind::DevServerCompleted
            }
            "dev-server-failed" | "session.dev-server.failed" => {
                EventKind::DevServerFailed { error: error() }
            }
            _ => return None,
        };
        Some(LifecycleEvent { session_id, kind })
    }
}
