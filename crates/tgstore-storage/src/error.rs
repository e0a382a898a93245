//! Storage operation errors

use tgstore_core::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No healthy backend available")]
    NoHealthyBackend,

    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Upload via {worker} failed: {reason}")]
    UploadFailed { worker: String, reason: String },

    #[error("Resolution via {worker} failed: {reason}")]
    ResolutionFailed { worker: String, reason: String },

    #[error("Stream from {worker} interrupted: {reason}")]
    StreamInterrupted { worker: String, reason: String },

    #[error("Delete via {worker} failed: {reason}")]
    DeleteFailed { worker: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NoHealthyBackend => AppError::NoHealthyBackend,
            StorageError::PayloadTooLarge { size, limit } => AppError::PayloadTooLarge(format!(
                "File size {} bytes exceeds maximum of {} bytes",
                size, limit
            )),
            err @ StorageError::UploadFailed { .. } => AppError::UploadFailed(err.to_string()),
            err @ StorageError::ResolutionFailed { .. } => {
                AppError::ResolutionFailed(err.to_string())
            }
            err @ StorageError::StreamInterrupted { .. } => {
                AppError::StreamInterrupted(err.to_string())
            }
            err @ StorageError::DeleteFailed { .. } => AppError::Internal(err.to_string()),
            StorageError::Config(msg) => AppError::Internal(format!("Storage configuration: {}", msg)),
        }
    }
}
