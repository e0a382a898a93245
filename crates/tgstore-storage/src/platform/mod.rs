//! Storage platform abstraction
//!
//! A `PlatformClient` is one authenticated account on the messaging platform
//! that backs the store. Every worker in the pool owns exactly one client.
//! Implementations do not enforce timeouts themselves; the pool components
//! bound every call.

pub mod telegram;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::PathBuf;
use std::pin::Pin;
use tgstore_core::{ContentPointer, MediaKind, MessageRef};
use thiserror::Error;

use crate::range::ByteRange;

pub use telegram::TelegramClient;

/// Errors reported by the platform or the transport to it
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Request timed out")]
    Timeout,

    #[error("Credentials rejected by the platform")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Platform error {code}: {description}")]
    Api { code: u16, description: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlatformError {
    /// Failures where the request may never have reached the platform.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Timeout | PlatformError::Transport(_))
    }
}

// URLs carry the bot token and are stripped before the error is rendered
impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlatformError::Timeout
        } else {
            PlatformError::Transport(err.without_url().to_string())
        }
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Upstream byte chunks in offset order
pub type ByteStream = Pin<Box<dyn Stream<Item = PlatformResult<Bytes>> + Send>>;

/// Account identity returned by the liveness call
#[derive(Debug, Clone)]
pub struct AccountIdentity {
    pub id: i64,
    pub username: Option<String>,
}

/// Upload payload. Spooled payloads are re-read from disk on every attempt.
#[derive(Debug, Clone)]
pub enum PayloadBody {
    Memory(Bytes),
    Spooled(PathBuf),
}

impl PayloadBody {
    /// Load the whole payload; meant for small bodies and test doubles.
    pub async fn read_all(&self) -> std::io::Result<Bytes> {
        match self {
            PayloadBody::Memory(bytes) => Ok(bytes.clone()),
            PayloadBody::Spooled(path) => tokio::fs::read(path).await.map(Bytes::from),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub chat_id: i64,
    pub kind: MediaKind,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub body: PayloadBody,
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub pointer: ContentPointer,
    pub message: MessageRef,
    pub remote_size: Option<u64>,
}

/// Fetchable location a content pointer resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamLocation {
    pub file_path: String,
    pub file_size: Option<u64>,
}

/// Open upstream response; the body has not been read yet.
pub struct UpstreamBody {
    pub status: u16,
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

impl std::fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamBody")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Lightweight authenticated call used by health probes.
    async fn get_me(&self) -> PlatformResult<AccountIdentity>;

    async fn send_media(&self, upload: MediaUpload) -> PlatformResult<UploadReceipt>;

    /// Resolve a content pointer to a fetchable location.
    async fn resolve(&self, pointer: &ContentPointer) -> PlatformResult<UpstreamLocation>;

    /// Open a fetch of `range` (or the whole object) at `location`.
    async fn fetch_range(
        &self,
        location: &UpstreamLocation,
        range: Option<ByteRange>,
    ) -> PlatformResult<UpstreamBody>;

    async fn delete_message(&self, message: MessageRef) -> PlatformResult<()>;
}
