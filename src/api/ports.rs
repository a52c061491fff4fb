//! `GET /ports/available`.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use super::AppState;
use crate::ports::reservation::PortAvailability;
use crate::Result;

/// Free and used ports of both ranges.
pub async fn available(State(state): State<Arc<AppState>>) -> Result<Json<PortAvailability>> {
    Ok(Json(state.reservations.availability().await?))
}
