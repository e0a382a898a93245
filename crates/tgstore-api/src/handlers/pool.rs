use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use tgstore_storage::WorkerStatus;

use crate::auth::ApiKey;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PoolStatusResponse {
    pub strategy: &'static str,
    pub healthy: usize,
    pub total: usize,
    pub workers: Vec<WorkerStatus>,
}

/// `GET /pool/status`: cached per-worker health and load. Never probes.
pub async fn pool_status(
    State(state): State<Arc<AppState>>,
    _api_key: ApiKey,
) -> Json<PoolStatusResponse> {
    let workers = state.pool.status();
    Json(PoolStatusResponse {
        strategy: state.selector.strategy_name(),
        healthy: workers.iter().filter(|w| w.healthy).count(),
        total: workers.len(),
        workers,
    })
}
