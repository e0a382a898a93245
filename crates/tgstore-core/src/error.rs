//! Error types module
//!
//! This module provides the core error type used throughout tgstore. All
//! failures that reach the HTTP layer are unified under `AppError`, which
//! describes its own presentation through `ErrorMetadata`.
//!
//! The `Database` variant wraps `sqlx::Error` when the `sqlx` feature is on and
//! falls back to a message otherwise.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Severity used when an error is logged at the HTTP boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Caller mistakes: bad input, unknown links, missing keys
    Debug,
    /// Degraded but expected, e.g. every worker down
    Warn,
    Error,
}

/// How an error is rendered to HTTP clients.
pub trait ErrorMetadata {
    fn http_status_code(&self) -> u16;

    /// Stable machine-readable code, e.g. `NO_HEALTHY_BACKEND`
    fn error_code(&self) -> &'static str;

    /// True when repeating the same request may succeed
    fn is_recoverable(&self) -> bool;

    fn suggested_action(&self) -> Option<&'static str>;

    /// Message safe to show to the caller
    fn client_message(&self) -> String;

    /// Internal details must not leave the process
    fn is_sensitive(&self) -> bool;

    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("No healthy backend available")]
    NoHealthyBackend,

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Content no longer resolvable: {0}")]
    ResolutionFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("I/O failure: {}", err))
    }
}

/// Presentation of one variant
struct Presentation {
    status: u16,
    code: &'static str,
    recoverable: bool,
    action: Option<&'static str>,
    sensitive: bool,
    level: LogLevel,
}

const CALLER_MISTAKE: Presentation = Presentation {
    status: 400,
    code: "INVALID_INPUT",
    recoverable: false,
    action: Some("Fix the request and send it again"),
    sensitive: false,
    level: LogLevel::Debug,
};

const SERVER_FAULT: Presentation = Presentation {
    status: 500,
    code: "INTERNAL_ERROR",
    recoverable: true,
    action: Some("Try again shortly"),
    sensitive: true,
    level: LogLevel::Error,
};

impl AppError {
    fn presentation(&self) -> Presentation {
        match self {
            AppError::Database(_) => Presentation {
                code: "DATABASE_ERROR",
                ..SERVER_FAULT
            },
            AppError::NoHealthyBackend => Presentation {
                status: 503,
                code: "NO_HEALTHY_BACKEND",
                action: Some("Wait a few seconds and retry"),
                sensitive: false,
                level: LogLevel::Warn,
                ..SERVER_FAULT
            },
            AppError::PayloadTooLarge(_) => Presentation {
                status: 413,
                code: "PAYLOAD_TOO_LARGE",
                action: Some("Reduce file size below the configured limit"),
                ..CALLER_MISTAKE
            },
            AppError::UploadFailed(_) => Presentation {
                code: "UPLOAD_FAILED",
                action: Some("Retry the upload"),
                ..SERVER_FAULT
            },
            AppError::ResolutionFailed(_) => Presentation {
                status: 404,
                code: "CONTENT_GONE",
                action: Some("The stored content is no longer available upstream"),
                level: LogLevel::Warn,
                ..CALLER_MISTAKE
            },
            AppError::StreamInterrupted(_) => Presentation {
                code: "STREAM_INTERRUPTED",
                action: Some("Retry the download"),
                ..SERVER_FAULT
            },
            AppError::InvalidInput(_) => CALLER_MISTAKE,
            AppError::NotFound(_) => Presentation {
                status: 404,
                code: "NOT_FOUND",
                action: Some("Verify the link or file ID"),
                ..CALLER_MISTAKE
            },
            AppError::Unauthorized(_) => Presentation {
                status: 401,
                code: "UNAUTHORIZED",
                action: Some("Provide a valid API key"),
                ..CALLER_MISTAKE
            },
            AppError::Forbidden(_) => Presentation {
                status: 403,
                code: "FORBIDDEN",
                action: None,
                ..CALLER_MISTAKE
            },
            AppError::Internal(_) | AppError::InternalWithSource { .. } => SERVER_FAULT,
        }
    }

    /// Variant name, reported next to `details` outside production
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Database(_) => "Database",
            AppError::NoHealthyBackend => "NoHealthyBackend",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::UploadFailed(_) => "UploadFailed",
            AppError::ResolutionFailed(_) => "ResolutionFailed",
            AppError::StreamInterrupted(_) => "StreamInterrupted",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NotFound(_) => "NotFound",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Forbidden(_) => "Forbidden",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// The error followed by up to five of its causes, one per line.
    pub fn detailed_message(&self) -> String {
        const MAX_CAUSES: usize = 5;

        let causes: Vec<String> =
            std::iter::successors(std::error::Error::source(self), |&err| err.source())
                .take(MAX_CAUSES + 1)
                .map(|err| err.to_string())
                .collect();

        let mut lines = vec![self.to_string()];
        lines.extend(
            causes
                .iter()
                .take(MAX_CAUSES)
                .map(|cause| format!("  caused by: {}", cause)),
        );
        if causes.len() > MAX_CAUSES {
            lines.push("  ...".to_string());
        }
        lines.join("\n")
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        self.presentation().status
    }

    fn error_code(&self) -> &'static str {
        self.presentation().code
    }

    fn is_recoverable(&self) -> bool {
        self.presentation().recoverable
    }

    fn suggested_action(&self) -> Option<&'static str> {
        self.presentation().action
    }

    fn is_sensitive(&self) -> bool {
        self.presentation().sensitive
    }

    fn log_level(&self) -> LogLevel {
        self.presentation().level
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access catalog".to_string(),
            AppError::NoHealthyBackend => "No healthy storage workers available".to_string(),
            AppError::UploadFailed(_) => "Upload to storage platform failed".to_string(),
            AppError::ResolutionFailed(_) => "File content is no longer available".to_string(),
            AppError::StreamInterrupted(_) => "Error streaming from storage platform".to_string(),
            AppError::PayloadTooLarge(msg)
            | AppError::InvalidInput(msg)
            | AppError::NotFound(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg) => msg.clone(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_healthy_backend_is_retryable_503() {
        let err = AppError::NoHealthyBackend;
        assert_eq!(err.http_status_code(), 503);
        assert_eq!(err.error_code(), "NO_HEALTHY_BACKEND");
        assert!(err.is_recoverable());
        assert!(!err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_oversized_upload_keeps_its_message() {
        let err = AppError::PayloadTooLarge("52428801 bytes exceeds 52428800".to_string());
        assert_eq!(err.http_status_code(), 413);
        assert_eq!(err.error_code(), "PAYLOAD_TOO_LARGE");
        assert!(!err.is_recoverable());
        assert!(err.client_message().contains("52428801"));
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_transfer_failures() {
        let upload = AppError::UploadFailed("timeout".to_string());
        assert_eq!(upload.http_status_code(), 500);
        assert!(upload.is_sensitive());
        assert_eq!(upload.client_message(), "Upload to storage platform failed");

        let gone = AppError::ResolutionFailed("file reference expired".to_string());
        assert_eq!(gone.http_status_code(), 404);
        assert_eq!(gone.error_code(), "CONTENT_GONE");
        assert_eq!(gone.log_level(), LogLevel::Warn);

        let interrupted = AppError::StreamInterrupted("reset".to_string());
        assert_eq!(interrupted.http_status_code(), 500);
        assert_eq!(interrupted.error_code(), "STREAM_INTERRUPTED");
    }

    #[test]
    fn test_caller_errors() {
        let missing = AppError::NotFound("File not found".to_string());
        assert_eq!(missing.http_status_code(), 404);
        assert_eq!(missing.client_message(), "File not found");
        assert!(!missing.is_sensitive());

        assert_eq!(AppError::Unauthorized("x".into()).http_status_code(), 401);
        assert_eq!(AppError::Forbidden("x".into()).http_status_code(), 403);
        assert_eq!(AppError::InvalidInput("x".into()).http_status_code(), 400);
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = AppError::Internal("pool poisoned".to_string());
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "Internal server error");
    }

    #[test]
    fn test_detailed_message_lists_causes() {
        let err = AppError::from(anyhow::anyhow!("root cause").context("outer context"));
        let details = err.detailed_message();
        assert!(details.starts_with("Internal error with source"));
        assert!(details.contains("caused by: outer context"));
    }
}
