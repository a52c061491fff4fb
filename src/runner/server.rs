//! Control API routes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::RunnerState;
use crate::api::json_body;
use crate::models::event::{EventKind, WireSessionId};
use crate::orchestrator::driver::Prompt;
use crate::{AppError, Result};

/// `POST /setup` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    /// Starter template to scaffold.
    #[serde(default)]
    pub template: Option<String>,
    /// Orchestrator session id.
    pub session_id: WireSessionId,
}

/// `POST /execute` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    /// Prompt text.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Model identifier.
    #[serde(default)]
    pub model_id: Option<String>,
    /// Orchestrator session id.
    pub session_id: WireSessionId,
    /// Model provider; defaults to the configured one.
    #[serde(default)]
    pub provider_id: Option<String>,
}

fn session_id(id: &WireSessionId) -> Result<i64> {
    id.as_i64()
        .ok_or_else(|| AppError::InvalidInput("sessionId must be an integer".into()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn setup(State(state): State<Arc<RunnerState>>, body: Bytes) -> Result<Json<Value>> {
    let request: SetupRequest = json_body(&body)?;
    let session_id = session_id(&request.session_id)?;
    let template = non_empty(request.template)
        .ok_or_else(|| AppError::InvalidInput("template is required".into()))?;
    if !state.config.templates.contains(&template) {
        return Err(AppError::InvalidInput(format!("template {template} not found")));
    }

    let task_state = Arc::clone(&state);
    tokio::spawn(
        async move {
            let directory = task_state.config.code_dir.clone();
            if let Ok(remote) = task_state.driver.setup(session_id, &directory, &template).await {
                task_state.remember(session_id, remote).await;
            }
        }
        .instrument(info_span!("runner_setup", session_id)),
    );

    Ok(Json(json!({ "success": true, "message": "setup started" })))
}

async fn execute(State(state): State<Arc<RunnerState>>, body: Bytes) -> Result<Json<Value>> {
    let request: ExecuteRequest = json_body(&body)?;
    let session_id = session_id(&request.session_id)?;
    if !state.config.code_dir.is_dir() {
        return Err(AppError::InvalidInput(
            "code directory does not exist; run /setup first".into(),
        ));
    }
    let (Some(text), Some(model_id)) = (non_empty(request.prompt), non_empty(request.model_id)) else {
        return Err(AppError::InvalidInput("prompt and modelId are required".into()));
    };
    let prompt = Prompt {
        text,
        provider_id: non_empty(request.provider_id).unwrap_or_else(|| state.config.default_provider.clone()),
        model_id,
    };

    let task_state = Arc::clone(&state);
    tokio::spawn(
        async move {
            let directory = task_state.config.code_dir.clone();
            let driver = &task_state.driver;
            let remote = match task_state.remote_session(session_id).await {
                Some(remote) => remote,
                None => match driver.open_remote_session(session_id, &directory).await {
                    Ok(remote) => {
                        task_state.remember(session_id, remote.clone()).await;
                        remote
                    }
                    Err(err) => {
                        warn!(%err, "could not open agent session");
                        driver
                            .emit(
                                session_id,
                                EventKind::PromptFailed {
                                    error: err.to_string(),
                                },
                            )
                            .await;
                        return;
                    }
                },
            };
            // Failures are already reported as prompt-failed.
            let _ = driver.execute(session_id, &remote, &directory, prompt).await;
        }
        .instrument(info_span!("runner_execute", session_id)),
    );

    Ok(Json(json!({ "success": true, "message": "execution started" })))
}

/// Build the control API router.
pub fn router(state: Arc<RunnerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/setup", post(setup))
        .route("/execute", post(execute))
        .with_state(state)
}

/// Serve the control API on `listener` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve_runner(listener: TcpListener, state: Arc<RunnerState>, ct: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "control api listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("control api error: {err}")))?;
    info!("control api shut down");
    Ok(())
}
