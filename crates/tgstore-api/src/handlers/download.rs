//! Download handlers: direct links and share links

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::Response,
};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tgstore_core::{AppError, CatalogRecord};
use tgstore_storage::{parse_range_header, StreamRequest};

use crate::auth::secure_compare;
use crate::error::HttpAppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub password: Option<String>,
}

/// `GET /dl/{file_id}/{filename}` and `GET /f/{file_id}/{filename}`
#[tracing::instrument(skip(state, query, headers), fields(operation = "download"))]
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path((file_id, filename)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    let record = state
        .catalog
        .find_by_id(&file_id)
        .await?
        .filter(|r| !r.is_expired(Utc::now()))
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    if record.has_password() {
        let expected = record.password.as_deref().unwrap_or_default();
        let presented = query.password.as_deref().unwrap_or_default();
        if !secure_compare(expected, presented) {
            return Err(AppError::Forbidden("Password required".to_string()).into());
        }
    }

    stream_record(&state, record, filename, &headers).await
}

/// `GET /share/{token}`. Share links do not ask for the password.
#[tracing::instrument(skip(state, token, headers), fields(operation = "share"))]
pub async fn share_file(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    let record = state
        .catalog
        .find_by_share_token(&token)
        .await?
        .filter(|r| !r.is_expired(Utc::now()))
        .ok_or_else(|| AppError::NotFound("Link expired or invalid".to_string()))?;

    let filename = record.file_name.clone();
    stream_record(&state, record, filename, &headers).await
}

async fn stream_record(
    state: &AppState,
    record: CatalogRecord,
    filename: String,
    headers: &HeaderMap,
) -> Result<Response, HttpAppError> {
    let range = parse_range_header(
        headers
            .get(header::RANGE)
            .and_then(|value| value.to_str().ok()),
    );

    tracing::debug!(
        file_id = %record.file_id,
        range = ?range,
        size = record.file_size,
        "Proxying file from storage"
    );

    let opened = state
        .streams
        .open_stream(StreamRequest {
            file_id: Some(record.file_id.clone()),
            pointer: record.pointer(),
            range,
            total_size: record.size_bytes(),
            mime_type: record.mime_type,
            file_name: filename,
        })
        .await?;

    let body_stream = opened.body.map(|result| {
        result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
    });

    let mut response = Response::new(Body::from_stream(body_stream));
    *response.status_mut() = opened.status;
    *response.headers_mut() = opened.headers;
    Ok(response)
}
