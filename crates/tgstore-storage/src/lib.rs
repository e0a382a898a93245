//! tgstore Storage Library
//!
//! Pooled access to the storage platform:
//! - Platform client abstraction and the Bot API implementation
//! - Worker pool with cached health and per-worker concurrency budgets
//! - Background health probing
//! - Worker selection strategies
//! - Upload coordination
//! - Range-aware streaming proxy

pub mod error;
pub mod health;
pub mod platform;
pub mod pool;
pub mod range;
pub mod selector;
pub mod stream;
pub mod upload;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use health::{HealthProber, ProbeSettings, ProberHandle};
pub use platform::{
    PayloadBody, PlatformClient, PlatformError, PlatformResult, TelegramClient, UploadReceipt,
};
pub use pool::{WorkerPool, WorkerStatus};
pub use range::{parse_range_header, ByteRange, RangeSpec};
pub use selector::{strategy_for, BackendSelector, SelectionStrategy, WorkerLease};
pub use stream::{
    content_disposition, RangeStreamProxy, RelayBody, StreamRequest, StreamResponse,
    StreamSettings,
};
pub use upload::{UploadCoordinator, UploadRequest, UploadSettings};
pub use worker::{HealthState, Worker};
