//! File management: listing, stats and deletion

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tgstore_core::constants::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use tgstore_core::{AppError, CatalogRecord, CatalogStats};

use crate::auth::ApiKey;
use crate::error::HttpAppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub catalog: CatalogStats,
    pub workers_total: usize,
    pub workers_healthy: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// `GET /files`. Non-admin keys only see files they uploaded.
#[tracing::instrument(skip(state, api_key), fields(operation = "list_files", admin = api_key.is_admin))]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    api_key: ApiKey,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<CatalogRecord>>, HttpAppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let files = state
        .catalog
        .list(api_key.owner_filter(), search, limit, offset)
        .await?;

    tracing::debug!(count = files.len(), limit, offset, "Listed files");
    Ok(Json(files))
}

/// `GET /stats`
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    _api_key: ApiKey,
) -> Result<Json<StatsResponse>, HttpAppError> {
    let catalog = state.catalog.stats().await?;
    Ok(Json(StatsResponse {
        catalog,
        workers_total: state.pool.len(),
        workers_healthy: state.pool.healthy().len(),
    }))
}

/// `DELETE /file/{file_id}`
///
/// The remote message is deleted first; a failure there is logged and the
/// catalog row is removed anyway so the file stops being served.
#[tracing::instrument(skip(state, api_key), fields(operation = "delete_file"))]
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    api_key: ApiKey,
    Path(file_id): Path<String>,
) -> Result<Json<DeleteResponse>, HttpAppError> {
    let record = state
        .catalog
        .find_by_id(&file_id)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    if !api_key.can_manage(record.owner_key.as_deref()) {
        return Err(AppError::Forbidden("File belongs to another key".to_string()).into());
    }

    if let Err(e) = state.uploads.delete_remote(record.message_ref()).await {
        tracing::error!(
            error = %e,
            file_id = %file_id,
            message_id = record.message_id,
            "Failed to delete remote message, removing catalog record anyway"
        );
    }

    state.catalog.delete(&file_id).await?;
    tracing::info!(file_id = %file_id, "File deleted");

    Ok(Json(DeleteResponse {
        status: "success",
        message: "File deleted",
    }))
}
