//! Session run and dev-server endpoints.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{optional_json, AppState};
use crate::models::session::{DevServerStatus, Session};
use crate::{AppError, Result};

/// Body of `POST /sessions/{id}/run`.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    /// Prompt; falls back to the batch's stored prompt.
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `POST /sessions/{id}/run`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAccepted {
    /// Session id.
    pub session_id: i64,
    /// Reserved application port.
    pub port: u16,
    /// Always `starting`.
    pub status: &'static str,
    /// Human-readable note.
    pub message: &'static str,
}

/// Dev-server state reported by start/stop.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevServerState {
    /// Session id.
    pub session_id: i64,
    /// Application port, if reserved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Dev server status.
    pub status: DevServerStatus,
}

/// `GET /sessions/{id}`.
pub async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<Session>> {
    Ok(Json(state.sessions.require(id).await?))
}

/// `GET /sessions/running`: sessions whose dev server is starting or running.
pub async fn running(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Session>>> {
    Ok(Json(state.sessions.list_dev_server_active().await?))
}

pub(super) async fn resolve_message(state: &AppState, session: &Session, message: Option<String>) -> Result<String> {
    if let Some(message) = message.filter(|m| !m.trim().is_empty()) {
        return Ok(message);
    }
    if let Some(batch_id) = session.batch_id {
        if let Some(prompt) = state
            .batches
            .get_by_id(batch_id)
            .await?
            .and_then(|batch| batch.prompt)
            .filter(|p| !p.trim().is_empty())
        {
            return Ok(prompt);
        }
    }
    Err(AppError::InvalidInput(
        "no message provided and batch has no stored prompt".into(),
    ))
}

/// `POST /sessions/{id}/run`: reserve a port and run the session in the
/// background.
pub async fn run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<RunAccepted>> {
    let request: RunRequest = optional_json(&body)?;
    let session = state.sessions.require(id).await?;

    if session.dev_server_status.is_active() {
        return Err(AppError::Conflict(format!(
            "session {id} dev server is already {}",
            session.dev_server_status
        )));
    }
    let permit = state
        .runs
        .try_acquire(id)
        .ok_or_else(|| AppError::Conflict(format!("session {id} already has a run in progress")))?;

    let message = resolve_message(&state, &session, request.message).await?;
    let port = state.reservations.reserve_app_port(id).await?;

    info!(session_id = id, port, "session run accepted");
    state.lifecycle.spawn(session, message, port, permit);

    Ok(Json(RunAccepted {
        session_id: id,
        port,
        status: "starting",
        message: "session setup started",
    }))
}

/// Reject dev-server control while a run owns the session's port.
fn ensure_no_run(state: &AppState, id: i64) -> Result<()> {
    if state.runs.is_active(id) {
        return Err(AppError::Conflict(format!("session {id} has a run in progress")));
    }
    Ok(())
}

/// `POST /sessions/{id}/start-dev`: start the dev server for an already
/// set up session. A no-op when it is starting or running.
pub async fn start_dev(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<DevServerState>> {
    let session = state.sessions.require(id).await?;
    ensure_no_run(&state, id)?;
    if session.dev_server_status.is_active() {
        return Ok(Json(DevServerState {
            session_id: id,
            port: session.port,
            status: session.dev_server_status,
        }));
    }

    let port = state.reservations.reserve_app_port(id).await?;
    let directory = PathBuf::from(&session.directory);
    match state.supervisor.start(id, &directory, port).await {
        Ok(server) => Ok(Json(DevServerState {
            session_id: id,
            port: Some(server.port),
            status: server.status,
        })),
        Err(err) => {
            if let Err(release_err) = state.reservations.release_port(id).await {
                warn!(session_id = id, %release_err, "failed to release port after start failure");
            }
            Err(err)
        }
    }
}

/// `POST /sessions/{id}/stop-dev`: stop the dev server and release the port.
pub async fn stop_dev(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<DevServerState>> {
    state.sessions.require(id).await?;
    ensure_no_run(&state, id)?;
    state.supervisor.stop(id).await?;
    state.reservations.release_port(id).await?;
    Ok(Json(DevServerState {
        session_id: id,
        port: None,
        status: DevServerStatus::Stopped,
    }))
}
