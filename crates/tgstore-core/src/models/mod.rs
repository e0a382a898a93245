//! Data models for the application
//!
//! `content` holds the values exchanged with the storage platform, `file` the
//! catalog records that point at them.

mod content;
mod file;

pub use content::{ContentPointer, MediaKind, MessageRef};
pub use file::{CatalogRecord, CatalogStats, NewCatalogRecord};
