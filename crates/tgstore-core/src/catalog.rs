//! Catalog contract.
//!
//! The catalog is the durable record of which content pointer backs which
//! file, plus the access attributes (owner, expiry, share token, password,
//! views). The storage core only depends on this trait; `tgstore-db` provides
//! the SQLite implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{CatalogRecord, CatalogStats, NewCatalogRecord};

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Look a file up by its identifier (the content pointer string).
    async fn find_by_id(&self, file_id: &str) -> Result<Option<CatalogRecord>, AppError>;

    async fn find_by_share_token(&self, token: &str) -> Result<Option<CatalogRecord>, AppError>;

    /// Persist a completed upload. Pointer and identifier are written together
    /// and never change afterwards.
    async fn record_upload(&self, record: NewCatalogRecord) -> Result<CatalogRecord, AppError>;

    async fn increment_views(&self, file_id: &str) -> Result<(), AppError>;

    /// Remove a file. Deleting an unknown id is not an error.
    async fn delete(&self, file_id: &str) -> Result<(), AppError>;

    /// Newest first. `owner = None` lists every owner.
    async fn list(
        &self,
        owner: Option<&str>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CatalogRecord>, AppError>;

    async fn stats(&self) -> Result<CatalogStats, AppError>;

    /// Records whose expiry is at or before `now`.
    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<CatalogRecord>, AppError>;

    /// Cheap round-trip used by readiness checks.
    async fn ping(&self) -> Result<(), AppError>;
}
