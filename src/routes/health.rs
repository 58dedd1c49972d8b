//! Liveness probe with a few gauges.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::event::now_ms;
use crate::services::{broadcast, registry};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    /// Seconds since the process started.
    pub uptime: u64,
    pub connections: usize,
    pub rooms: usize,
    pub timestamp: i64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok".into(),
        uptime: state.started_at.elapsed().as_secs(),
        connections: broadcast::connection_count(&state).await,
        rooms: registry::room_count(&state).await,
        timestamp: now_ms(),
    })
}
