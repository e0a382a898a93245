//! Liveness and readiness probes

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;

const CATALOG_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub catalog: String,
    pub healthy_workers: usize,
    pub total_workers: usize,
}

pub async fn liveness_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "alive" })),
    )
}

/// Ready when at least one worker is healthy and the catalog answers.
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let catalog = match tokio::time::timeout(CATALOG_CHECK_TIMEOUT, state.catalog.ping()).await {
        Ok(Ok(())) => "ready".to_string(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Catalog readiness check failed");
            format!("not_ready: {}", e)
        }
        Err(_) => {
            tracing::error!("Catalog readiness check timed out");
            "timeout".to_string()
        }
    };

    let healthy_workers = state.pool.healthy().len();
    let ready = catalog == "ready" && healthy_workers > 0;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "not_ready" },
            catalog,
            healthy_workers,
            total_workers: state.pool.len(),
        }),
    )
}
