use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::models::backend::{BackendHealth, BackendKind, OverallStatus};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: OverallStatus,
    pub version: String,
    pub backends: BTreeMap<BackendKind, BackendHealth>,
    pub capabilities: Capabilities,
    pub queue_depth: usize,
    pub checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Capabilities {
    pub ocr_backends: Vec<BackendKind>,
    pub degraded_mode: bool,
}

/// GET /health: capability report from the cached snapshot.
///
/// Always 200: a degraded service still accepts and queues work.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.health.snapshot();
    let status = snapshot.overall();

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        backends: snapshot.backends.clone(),
        capabilities: Capabilities {
            ocr_backends: snapshot.available(),
            degraded_mode: status == OverallStatus::Degraded,
        },
        queue_depth: state.store.queue_depth(),
        checked_at: snapshot.refreshed_at,
    })
}
