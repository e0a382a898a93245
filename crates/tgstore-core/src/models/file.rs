use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ContentPointer, MessageRef};

/// A stored file as recorded in the catalog.
///
/// `file_id` is the content pointer issued by the platform and doubles as the
/// public file identifier. Only `view_count` and `expires_at` change after the
/// record is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CatalogRecord {
    pub file_id: String,
    pub chat_id: i64,
    pub message_id: i64,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
    pub owner_key: Option<String>,
    pub upload_date: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub share_token: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub view_count: i64,
}

impl CatalogRecord {
    pub fn pointer(&self) -> ContentPointer {
        ContentPointer::new(self.file_id.clone())
    }

    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat_id,
            message_id: self.message_id,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn has_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Size as an unsigned byte count; negative values never come out of the
    /// catalog but are clamped to zero.
    pub fn size_bytes(&self) -> u64 {
        u64::try_from(self.file_size).unwrap_or(0)
    }
}

/// Insert shape for a freshly uploaded file.
#[derive(Debug, Clone)]
pub struct NewCatalogRecord {
    pub pointer: ContentPointer,
    pub message: MessageRef,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub owner_key: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub share_token: Option<String>,
    pub password: Option<String>,
}

/// Aggregate numbers over the whole catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total_files: i64,
    pub total_size_bytes: i64,
    pub total_views: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_at: Option<DateTime<Utc>>) -> CatalogRecord {
        CatalogRecord {
            file_id: "abc".to_string(),
            chat_id: -100,
            message_id: 7,
            file_name: "a.txt".to_string(),
            file_size: 3,
            mime_type: "text/plain".to_string(),
            owner_key: None,
            upload_date: Utc::now(),
            expires_at,
            share_token: None,
            password: Some("secret".to_string()),
            view_count: 0,
        }
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        assert!(!record(None).is_expired(now));
        assert!(!record(Some(now + Duration::hours(1))).is_expired(now));
        assert!(record(Some(now - Duration::seconds(1))).is_expired(now));
    }

    #[test]
    fn test_password_not_serialized() {
        let json = serde_json::to_value(record(None)).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["file_id"], "abc");
    }
}
