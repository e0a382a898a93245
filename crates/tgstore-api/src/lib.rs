//! tgstore API Library
//!
//! HTTP handlers, authentication, error rendering and application setup.

pub mod auth;
pub mod error;
mod handlers;
pub mod setup;
pub mod state;

pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
