//! Wire types shared between the upload worker and its foreground clients.
//!
//! Commands flow inbound (client → worker), events flow outbound
//! (worker → every attached client). Both are flat JSON objects with a
//! `type` discriminator and camelCase payload fields, matching the
//! control-plane server's existing wire format.

pub mod commands;
pub mod events;
pub mod types;

pub use commands::{Command, DecodeError};
pub use events::Event;
pub use types::{
    ChunkOverrides, ChunkStatus, CompletedPart, ListedPart, LogLevel, RetryOverrides,
    UploadChunk, UploadState, UploadStatus, UploadSummary,
};
