//! Catalog persistence for tgstore.
//!
//! `SqliteCatalog` implements `tgstore_core::CatalogRepository` on top of sqlx.

pub mod db;

pub use db::{connect, run_migrations, SqliteCatalog};
