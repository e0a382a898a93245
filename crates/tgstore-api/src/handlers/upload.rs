//! Upload handler
//!
//! The multipart file is spooled to a temporary file before any worker is
//! leased, so a slow client never holds a worker slot. The spool is removed
//! when the handler returns.

use axum::{
    extract::{multipart::Field, Multipart, State},
    Json,
};
use chrono::{Duration, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::distr::{Alphanumeric, SampleString};
use serde::Serialize;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tgstore_core::constants::DEFAULT_MIME_TYPE;
use tgstore_core::{AppError, NewCatalogRecord};
use tgstore_storage::{PayloadBody, UploadRequest};
use tokio::io::AsyncWriteExt;

use crate::auth::ApiKey;
use crate::error::HttpAppError;
use crate::state::AppState;

const SHARE_TOKEN_LEN: usize = 22;
const MAX_EXPIRATION_DAYS: i64 = 3650;

/// Unreserved URL characters stay readable in generated links
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub file_id: String,
    pub direct_link: String,
    pub share_link: String,
}

struct SpooledFile {
    file_name: String,
    mime_type: String,
    size: u64,
    spool: NamedTempFile,
}

#[tracing::instrument(skip(state, api_key, multipart), fields(operation = "upload", admin = api_key.is_admin))]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    api_key: ApiKey,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, HttpAppError> {
    let limit = state.uploads.max_upload_bytes();
    let mut spooled: Option<SpooledFile> = None;
    let mut expiration_days: Option<i64> = None;
    let mut password: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => spooled = Some(spool_field(field, limit).await?),
            "expiration_days" => expiration_days = parse_expiration(&field.text().await?)?,
            "password" => {
                let value = field.text().await?;
                password = (!value.is_empty()).then_some(value);
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown multipart field");
            }
        }
    }

    let spooled =
        spooled.ok_or_else(|| AppError::InvalidInput("Missing 'file' field".to_string()))?;

    tracing::info!(
        file_name = %spooled.file_name,
        size = spooled.size,
        mime_type = %spooled.mime_type,
        "Uploading file"
    );

    let receipt = state
        .uploads
        .upload(UploadRequest {
            file_name: spooled.file_name.clone(),
            mime_type: spooled.mime_type.clone(),
            size: spooled.size,
            body: PayloadBody::Spooled(spooled.spool.path().to_path_buf()),
        })
        .await?;

    let share_token = Alphanumeric.sample_string(&mut rand::rng(), SHARE_TOKEN_LEN);
    let record = state
        .catalog
        .record_upload(NewCatalogRecord {
            pointer: receipt.pointer,
            message: receipt.message,
            file_name: spooled.file_name,
            file_size: spooled.size,
            mime_type: spooled.mime_type,
            owner_key: Some(api_key.key),
            expires_at: expiration_days.map(|days| Utc::now() + Duration::days(days)),
            share_token: Some(share_token.clone()),
            password,
        })
        .await?;

    Ok(Json(UploadResponse {
        status: "success",
        direct_link: format!(
            "{}/dl/{}/{}",
            state.base_url,
            utf8_percent_encode(&record.file_id, PATH_SEGMENT),
            utf8_percent_encode(&record.file_name, PATH_SEGMENT)
        ),
        share_link: format!("{}/share/{}", state.base_url, share_token),
        file_id: record.file_id,
    }))
}

/// Copy the file field to disk, failing as soon as it exceeds `limit`.
async fn spool_field(mut field: Field<'_>, limit: u64) -> Result<SpooledFile, HttpAppError> {
    let file_name = sanitize_file_name(field.file_name().unwrap_or_default());
    let mime_type = field
        .content_type()
        .filter(|ct| !ct.is_empty())
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string();

    let spool = NamedTempFile::new()?;
    let mut writer = tokio::fs::File::create(spool.path()).await?;
    let mut size: u64 = 0;

    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        if size > limit {
            return Err(AppError::PayloadTooLarge(format!(
                "File exceeds maximum of {} bytes",
                limit
            ))
            .into());
        }
        writer.write_all(&chunk).await?;
    }
    writer.flush().await?;

    Ok(SpooledFile {
        file_name,
        mime_type,
        size,
        spool,
    })
}

fn parse_expiration(raw: &str) -> Result<Option<i64>, HttpAppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<i64>() {
        Ok(days) if (1..=MAX_EXPIRATION_DAYS).contains(&days) => Ok(Some(days)),
        _ => Err(AppError::InvalidInput(format!(
            "expiration_days must be an integer between 1 and {}",
            MAX_EXPIRATION_DAYS
        ))
        .into()),
    }
}

/// Keep only the final path segment of a client-supplied name.
fn sanitize_file_name(raw: &str) -> String {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .replace(char::is_control, "");
    if name.is_empty() || name == "." || name == ".." {
        "file".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_file_name(""), "file");
        assert_eq!(sanitize_file_name("dir/"), "file");
    }

    #[test]
    fn test_parse_expiration() {
        assert_eq!(parse_expiration("").unwrap(), None);
        assert_eq!(parse_expiration(" 7 ").unwrap(), Some(7));
        assert!(parse_expiration("0").is_err());
        assert!(parse_expiration("-1").is_err());
        assert!(parse_expiration("soon").is_err());
    }
}
