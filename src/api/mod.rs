//! Orchestrator HTTP API.
//!
//! Every handler returns JSON; failures are `{"error": "..."}` with the
//! status chosen in [`error`].

pub mod containers;
pub mod error;
pub mod ports;
pub mod sessions;

use std::sync::Arc;

use axum::body::Bytes;
use axum::routing::{get, post};
use axum::Router;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::environment::manager::EnvironmentManager;
use crate::orchestrator::lifecycle::LifecycleRunner;
use crate::orchestrator::runs::RunRegistry;
use crate::persistence::batch_repo::BatchRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::ports::reservation::PortReservations;
use crate::supervisor::ProcessSupervisor;
use crate::{AppError, Result};

/// Shared state handed to every handler.
pub struct AppState {
    /// Session persistence.
    pub sessions: SessionRepo,
    /// Batch persistence (prompt fallback for runs).
    pub batches: BatchRepo,
    /// Port reservations.
    pub reservations: Arc<PortReservations>,
    /// Dev-server supervisor.
    pub supervisor: ProcessSupervisor,
    /// Background session runs.
    pub lifecycle: LifecycleRunner,
    /// In-flight run guard.
    pub runs: RunRegistry,
    /// Environment manager; `None` without a container runtime.
    pub environments: Option<Arc<EnvironmentManager>>,
    /// Client for the environments' control APIs.
    pub http: reqwest::Client,
}

impl AppState {
    fn environments(&self) -> Result<&EnvironmentManager> {
        self.environments
            .as_deref()
            .ok_or_else(|| AppError::Conflict("no container runtime configured".into()))
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ports/available", get(ports::available))
        .route("/sessions/running", get(sessions::running))
        .route("/sessions/{id}", get(sessions::get_session))
        .route("/sessions/{id}/run", post(sessions::run))
        .route("/sessions/{id}/start-dev", post(sessions::start_dev))
        .route("/sessions/{id}/stop-dev", post(sessions::stop_dev))
        .route("/sessions/{id}/container", post(containers::ensure))
        .route("/sessions/{id}/setup", post(containers::setup))
        .route("/sessions/{id}/execute", post(containers::execute))
        .with_state(state)
}

/// Serve the API on `listener` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve_api(listener: TcpListener, state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "orchestrator api listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("api server error: {err}")))?;
    info!("orchestrator api shut down");
    Ok(())
}

/// Decode a required JSON body. Rejections become `InvalidInput` so they
/// share the `{"error": ...}` shape of every other failure.
pub(crate) fn json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body).map_err(|err| AppError::InvalidInput(format!("invalid json body: {err}")))
}

/// Decode an optional JSON body; an empty body yields the default value.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    json_body(body)
}
