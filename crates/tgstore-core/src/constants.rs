//! Shared constants.

/// Hard per-item ceiling of the Bot API upload endpoints (50 MiB).
pub const PLATFORM_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Probe timeouts above this are rejected by `Config::validate`.
pub const MAX_PROBE_TIMEOUT_SECS: u64 = 10;

/// Fallback MIME type when the client does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// MIME fragments that browsers render inline rather than download.
pub const INLINE_MIME_FRAGMENTS: [&str; 5] = ["image", "text", "pdf", "video", "audio"];

/// Default page size for file listings.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Upper bound for file listing page size.
pub const MAX_LIST_LIMIT: i64 = 500;
