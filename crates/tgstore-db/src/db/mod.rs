//! Database repositories and connection setup
//
// File catalog repository
mod files;
//
// Pool creation and migrations
mod setup;

pub use files::SqliteCatalog;
pub use setup::{connect, run_migrations};
