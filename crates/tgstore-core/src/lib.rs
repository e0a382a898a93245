//! tgstore Core Library
//!
//! This crate provides the domain models, error types, configuration and the
//! catalog contract shared by every tgstore component.

pub mod catalog;
pub mod config;
pub mod constants;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use catalog::CatalogRepository;
pub use config::{
    BaseConfig, Config, ForwardProxyConfig, LogFormat, PoolConfig, SelectionStrategyKind,
    TelegramConfig, TransferConfig,
};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{
    CatalogRecord, CatalogStats, ContentPointer, MediaKind, MessageRef, NewCatalogRecord,
};
