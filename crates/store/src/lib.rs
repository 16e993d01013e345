//! Durable upload registry backed by a single SQLite database file.
//!
//! Three collections mirror the worker's persisted layout: `uploads`
//! (keyed by content id), `chunks` (keyed by chunk id, secondary index on
//! `upload_id`), and `metadata`. Every operation is a single transaction;
//! no read-modify-write spans transactions.

mod sqlite;

pub use sqlite::{DB_NAME, SCHEMA_VERSION, UploadStore};

/// Errors produced by the persistence store.
///
/// Storage failures are fatal for the operation that hit them only; the
/// engine decides whether to continue in best-effort mode.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
