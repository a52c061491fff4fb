//! Environment endpoints: ensure the session's container and forward
//! setup/execute requests to its control API.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::sessions::{resolve_message, RunRequest};
use super::{optional_json, AppState};
use crate::{AppError, Result};

/// `POST /sessions/{id}/container`.
///
/// Existing environment: 200 `{environmentId, state}`. New environment:
/// 201 `{environmentId, controlPort, appPort}`.
pub async fn ensure(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Response> {
    let manager = state.environments()?;
    let ensured = manager.ensure_environment(id).await?;

    if ensured.created {
        info!(session_id = id, environment_id = %ensured.environment_id, "environment created");
        let body = json!({
            "environmentId": ensured.environment_id,
            "controlPort": ensured.control_port,
            "appPort": ensured.app_port,
        });
        return Ok((StatusCode::CREATED, Json(body)).into_response());
    }

    let status = match manager.inspect(&ensured.environment_id).await {
        Ok(info) => info.status,
        Err(AppError::NotFound(_)) => "missing".to_owned(),
        Err(err) => return Err(err),
    };
    let body = json!({ "environmentId": ensured.environment_id, "state": status });
    Ok(Json(body).into_response())
}

/// `POST /sessions/{id}/setup`: ask the environment to scaffold the
/// session's starter template.
pub async fn setup(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Response> {
    let session = state.sessions.require(id).await?;
    let payload = json!({
        "template": session.starter_template,
        "sessionId": id,
    });
    forward(&state, id, "setup", &payload).await
}

/// `POST /sessions/{id}/execute {message?}`: ask the environment to run a
/// prompt with the session's model.
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Response> {
    let request: RunRequest = optional_json(&body)?;
    let session = state.sessions.require(id).await?;
    let prompt = resolve_message(&state, &session, request.message).await?;
    let payload = json!({
        "prompt": prompt,
        "modelId": session.model_id,
        "providerId": session.provider_id,
        "sessionId": id,
    });
    forward(&state, id, "execute", &payload).await
}

async fn forward(state: &AppState, session_id: i64, path: &str, payload: &Value) -> Result<Response> {
    let control_port = state.environments()?.control_port(session_id).await?;
    let url = format!("http://127.0.0.1:{control_port}/{path}");
    debug!(session_id, %url, "forwarding to environment");

    let response = state
        .http
        .post(&url)
        .json(payload)
        .send()
        .await
        .map_err(|err| AppError::Container(format!("environment unreachable: {err}")))?;

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body: Value = response
        .json()
        .await
        .map_err(|err| AppError::Container(format!("malformed environment response: {err}")))?;
    Ok((status, Json(body)).into_response())
}
