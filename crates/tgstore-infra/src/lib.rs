//! tgstore Infrastructure Library
//!
//! Shared infrastructure for the tgstore service:
//! - Middleware (request ID)
//! - Tracing initialization
//! - Expired file sweeping

#[cfg(feature = "middleware")]
pub mod middleware;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "expiry")]
pub mod expiry;

// Re-export commonly used types
#[cfg(feature = "middleware")]
pub use middleware::{get_request_id, request_id_middleware, RequestId, REQUEST_ID_HEADER};

#[cfg(feature = "observability-basic")]
pub use telemetry::init_telemetry;

#[cfg(feature = "expiry")]
pub use expiry::{ExpirySweeper, SweepReport, SweeperHandle};
