use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool};
use tgstore_core::{AppError, CatalogRecord, CatalogRepository, CatalogStats, NewCatalogRecord};

const FILE_COLUMNS: &str = "file_id, chat_id, message_id, file_name, file_size, mime_type, \
     owner_key, upload_date, expires_at, share_token, password, view_count";

/// SQLite-backed file catalog
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Escape LIKE wildcards so user input matches literally.
fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl CatalogRepository for SqliteCatalog {
    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    async fn find_by_id(&self, file_id: &str) -> Result<Option<CatalogRecord>, AppError> {
        let record = sqlx::query_as::<Sqlite, CatalogRecord>(&format!(
            "SELECT {} FROM files WHERE file_id = ?",
            FILE_COLUMNS
        ))
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self, token), fields(db.table = "files", db.operation = "select"))]
    async fn find_by_share_token(&self, token: &str) -> Result<Option<CatalogRecord>, AppError> {
        let record = sqlx::query_as::<Sqlite, CatalogRecord>(&format!(
            "SELECT {} FROM files WHERE share_token = ?",
            FILE_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[tracing::instrument(
        skip(self, record),
        fields(db.table = "files", db.operation = "insert", file_id = %record.pointer)
    )]
    async fn record_upload(&self, record: NewCatalogRecord) -> Result<CatalogRecord, AppError> {
        let file_size = i64::try_from(record.file_size)
            .map_err(|_| AppError::InvalidInput("File size out of range".to_string()))?;

        let inserted = sqlx::query_as::<Sqlite, CatalogRecord>(&format!(
            r#"
            INSERT INTO files (file_id, chat_id, message_id, file_name, file_size, mime_type,
                               owner_key, upload_date, expires_at, share_token, password, view_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            RETURNING {}
            "#,
            FILE_COLUMNS
        ))
        .bind(record.pointer.as_str())
        .bind(record.message.chat_id)
        .bind(record.message.message_id)
        .bind(&record.file_name)
        .bind(file_size)
        .bind(&record.mime_type)
        .bind(&record.owner_key)
        .bind(Utc::now())
        .bind(record.expires_at)
        .bind(&record.share_token)
        .bind(&record.password)
        .fetch_one(&self.pool)
        .await?;

        Ok(inserted)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "update"))]
    async fn increment_views(&self, file_id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE files SET view_count = view_count + 1 WHERE file_id = ?")
            .bind(file_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "delete"))]
    async fn delete(&self, file_id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM files WHERE file_id = ?")
            .bind(file_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(file_id = %file_id, "Delete matched no catalog row");
        }

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    async fn list(
        &self,
        owner: Option<&str>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CatalogRecord>, AppError> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());

        let mut query = format!("SELECT {} FROM files WHERE 1 = 1", FILE_COLUMNS);
        if owner.is_some() {
            query.push_str(" AND owner_key = ?");
        }
        if search.is_some() {
            query.push_str(" AND file_name LIKE ? ESCAPE '\\'");
        }
        query.push_str(" ORDER BY upload_date DESC, id DESC LIMIT ? OFFSET ?");

        let mut query_builder = sqlx::query_as::<Sqlite, CatalogRecord>(&query);
        if let Some(owner) = owner {
            query_builder = query_builder.bind(owner);
        }
        if let Some(search) = search {
            query_builder = query_builder.bind(like_pattern(search));
        }
        query_builder = query_builder.bind(limit).bind(offset.max(0));

        let records = query_builder.fetch_all(&self.pool).await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    async fn stats(&self) -> Result<CatalogStats, AppError> {
        let (total_files, total_size_bytes, total_views): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(file_size), 0), COALESCE(SUM(view_count), 0) FROM files",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CatalogStats {
            total_files,
            total_size_bytes,
            total_views,
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<CatalogRecord>, AppError> {
        let records = sqlx::query_as::<Sqlite, CatalogRecord>(&format!(
            "SELECT {} FROM files WHERE expires_at IS NOT NULL AND expires_at <= ? ORDER BY expires_at ASC",
            FILE_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
