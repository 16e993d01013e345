//! Multipart upload engine.
//!
//! Owns the in-memory registry of active uploads, schedules part uploads
//! with bounded concurrency, drives the per-upload state machine,
//! persists every transition, and broadcasts events to attached clients.
//! All state mutation happens inside engine command handlers and each
//! upload's drive loop; parts only ever flow outward.

pub mod bus;
pub mod config;
mod driver;
pub mod engine;
pub mod lifecycle;
mod registry;
pub mod source;
mod speed;

pub use bus::MessageBus;
pub use config::{AccelerationSettings, ConfigError, RetrySettings, WorkerConfig};
pub use engine::UploadEngine;
pub use lifecycle::{LifecycleController, LifecycleEvent};
pub use source::{FileSource, FsFileSource};

/// Epoch milliseconds, the timestamp unit used in persisted records and
/// outbound events.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
