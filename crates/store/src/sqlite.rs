//! SQLite-backed implementation of the upload registry.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite library
//! is required. All async methods are thin wrappers around synchronous
//! rusqlite calls executed under a `Mutex`; the connection is opened
//! lazily on first use and cached for the life of the store.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use hoist_protocol::{ChunkStatus, UploadChunk, UploadState};

use crate::StorageError;

/// Database name shared with the worker's previous persisted layout.
pub const DB_NAME: &str = "UploadServiceWorkerDB";

/// Current schema version. Bumped when migrations are added.
pub const SCHEMA_VERSION: i64 = 1;

enum Target {
    File(PathBuf),
    Memory,
}

/// Durable store for upload state, queued chunks, and worker metadata.
pub struct UploadStore {
    target: Target,
    conn: Mutex<Option<Connection>>,
}

impl UploadStore {
    /// Creates a store persisting to `<dir>/UploadServiceWorkerDB.sqlite3`.
    ///
    /// The database is not touched until the first operation.
    pub fn new(dir: &Path) -> Self {
        Self {
            target: Target::File(dir.join(format!("{DB_NAME}.sqlite3"))),
            conn: Mutex::new(None),
        }
    }

    /// Creates an in-memory store (tests and ephemeral runs).
    pub fn in_memory() -> Self {
        Self {
            target: Target::Memory,
            conn: Mutex::new(None),
        }
    }

    /// Runs `f` against the cached connection, opening and migrating the
    /// database on first use.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.conn.lock().expect("store mutex poisoned");
        if guard.is_none() {
            let conn = match &self.target {
                Target::File(path) => Connection::open(path)?,
                Target::Memory => Connection::open_in_memory()?,
            };
            apply_pragmas(&conn)?;
            init_schema(&conn)?;
            *guard = Some(conn);
        }
        f(guard.as_ref().expect("connection just opened"))
    }

    // -----------------------------------------------------------------
    // uploads
    // -----------------------------------------------------------------

    /// Upserts one upload record by content id. Atomic.
    pub async fn save_upload_state(&self, state: &UploadState) -> Result<(), StorageError> {
        let data = serde_json::to_string(state)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO uploads (id, status, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET status = ?2, data = ?3",
                params![state.content_id, state.status.to_string(), data],
            )?;
            Ok(())
        })
    }

    /// Loads one upload record, or `None` if absent.
    pub async fn load_upload_state(
        &self,
        content_id: &str,
    ) -> Result<Option<UploadState>, StorageError> {
        self.with_conn(|conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM uploads WHERE id = ?1",
                    params![content_id],
                    |row| row.get(0),
                )
                .optional()?;
            match data {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
    }

    /// Full scan of every persisted upload record. Ordering unspecified.
    pub async fn load_all_upload_states(&self) -> Result<Vec<UploadState>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT data FROM uploads")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut states = Vec::new();
            for row in rows {
                let json = row?;
                match serde_json::from_str(&json) {
                    Ok(state) => states.push(state),
                    // A single corrupt record must not take down cold-start
                    // hydration.
                    Err(e) => tracing::warn!(error = %e, "skipping unreadable upload record"),
                }
            }
            Ok(states)
        })
    }

    /// Deletes one upload record. Idempotent.
    pub async fn delete_upload_state(&self, content_id: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM uploads WHERE id = ?1", params![content_id])?;
            Ok(())
        })
    }

    // -----------------------------------------------------------------
    // chunks
    // -----------------------------------------------------------------

    /// Upserts one durably queued chunk by chunk id. Atomic.
    pub async fn save_chunk(&self, chunk: &UploadChunk) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chunks
                     (id, upload_id, part_number, size, data, status,
                      attempts, last_attempt, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                     size = ?4, data = ?5, status = ?6,
                     attempts = ?7, last_attempt = ?8, error = ?9",
                params![
                    chunk.id,
                    chunk.upload_id,
                    chunk.part_number,
                    chunk.size as i64,
                    chunk.data,
                    chunk.status.to_string(),
                    chunk.attempts,
                    chunk.last_attempt.map(|t| t as i64),
                    chunk.error,
                ],
            )?;
            Ok(())
        })
    }

    /// Loads every chunk whose secondary index matches `upload_id`,
    /// ordered by part number.
    pub async fn load_chunks(&self, upload_id: &str) -> Result<Vec<UploadChunk>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, upload_id, part_number, size, data, status,
                        attempts, last_attempt, error
                 FROM chunks WHERE upload_id = ?1 ORDER BY part_number",
            )?;
            let rows = stmt.query_map(params![upload_id], |row| {
                Ok(UploadChunk {
                    id: row.get(0)?,
                    upload_id: row.get(1)?,
                    part_number: row.get(2)?,
                    size: row.get::<_, i64>(3)? as u64,
                    data: row.get(4)?,
                    status: parse_chunk_status(&row.get::<_, String>(5)?),
                    attempts: row.get(6)?,
                    last_attempt: row.get::<_, Option<i64>>(7)?.map(|t| t as u64),
                    error: row.get(8)?,
                })
            })?;
            let mut chunks = Vec::new();
            for row in rows {
                chunks.push(row?);
            }
            Ok(chunks)
        })
    }

    /// Deletes every chunk belonging to `upload_id`. Idempotent.
    pub async fn delete_chunks(&self, upload_id: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM chunks WHERE upload_id = ?1", params![upload_id])?;
            Ok(())
        })
    }

    // -----------------------------------------------------------------
    // metadata
    // -----------------------------------------------------------------

    /// Sets one store-level metadata value.
    pub async fn set_metadata(&self, id: &str, value: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO metadata (id, value) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET value = ?2",
                params![id, value],
            )?;
            Ok(())
        })
    }

    /// Reads one store-level metadata value.
    pub async fn get_metadata(&self, id: &str) -> Result<Option<String>, StorageError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM metadata WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )?;
    Ok(())
}

/// Creates the collections if they do not already exist. Idempotent, safe
/// to run on every startup.
fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS uploads (
            id     TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            data   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunks (
            id           TEXT PRIMARY KEY,
            upload_id    TEXT NOT NULL,
            part_number  INTEGER NOT NULL,
            size         INTEGER NOT NULL,
            data         BLOB NOT NULL,
            status       TEXT NOT NULL,
            attempts     INTEGER NOT NULL DEFAULT 0,
            last_attempt INTEGER,
            error        TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_upload_id
            ON chunks(upload_id);

        CREATE TABLE IF NOT EXISTS metadata (
            id    TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at)
         VALUES (?1, datetime('now'))",
        params![SCHEMA_VERSION],
    )?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

fn parse_chunk_status(s: &str) -> ChunkStatus {
    match s {
        "uploading" => ChunkStatus::Uploading,
        "uploaded" => ChunkStatus::Uploaded,
        "failed" => ChunkStatus::Failed,
        _ => ChunkStatus::Queued,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoist_protocol::UploadStatus;
    use std::path::PathBuf;

    fn sample_state(content_id: &str, status: UploadStatus) -> UploadState {
        UploadState {
            content_id: content_id.into(),
            upload_id: format!("mp-{content_id}"),
            key: format!("videos/{content_id}.mp4"),
            file_path: PathBuf::from("/tmp/sample.mp4"),
            file_name: "sample.mp4".into(),
            file_size: 25 * 1024 * 1024,
            file_type: "video/mp4".into(),
            part_size: 10 * 1024 * 1024,
            max_concurrent_uploads: 5,
            parts: Vec::new(),
            progress: 0,
            status,
            start_time: 1_700_000_000_000,
            accelerated: false,
            error: None,
            file_url: None,
        }
    }

    fn sample_chunk(upload_id: &str, part_number: u32) -> UploadChunk {
        UploadChunk {
            id: format!("{upload_id}:{part_number}"),
            upload_id: upload_id.into(),
            part_number,
            size: 4,
            data: vec![1, 2, 3, 4],
            status: ChunkStatus::Queued,
            attempts: 0,
            last_attempt: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let store = UploadStore::in_memory();
        let state = sample_state("c1", UploadStatus::InProgress);
        store.save_upload_state(&state).await.unwrap();

        let loaded = store.load_upload_state("c1").await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn load_absent_returns_none() {
        let store = UploadStore::in_memory();
        assert!(store.load_upload_state("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_is_upsert() {
        let store = UploadStore::in_memory();
        let mut state = sample_state("c1", UploadStatus::InProgress);
        store.save_upload_state(&state).await.unwrap();

        state.status = UploadStatus::Paused;
        state.progress = 40;
        store.save_upload_state(&state).await.unwrap();

        let loaded = store.load_upload_state("c1").await.unwrap().unwrap();
        assert_eq!(loaded.status, UploadStatus::Paused);
        assert_eq!(loaded.progress, 40);

        let all = store.load_all_upload_states().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn load_all_returns_every_record() {
        let store = UploadStore::in_memory();
        store
            .save_upload_state(&sample_state("a", UploadStatus::InProgress))
            .await
            .unwrap();
        store
            .save_upload_state(&sample_state("b", UploadStatus::Paused))
            .await
            .unwrap();
        store
            .save_upload_state(&sample_state("c", UploadStatus::Completed))
            .await
            .unwrap();

        let mut ids: Vec<String> = store
            .load_all_upload_states()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.content_id)
            .collect();
        ids.sort();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = UploadStore::in_memory();
        store
            .save_upload_state(&sample_state("c1", UploadStatus::InProgress))
            .await
            .unwrap();

        store.delete_upload_state("c1").await.unwrap();
        assert!(store.load_upload_state("c1").await.unwrap().is_none());
        // Second delete is a no-op, not an error.
        store.delete_upload_state("c1").await.unwrap();
    }

    #[tokio::test]
    async fn chunks_round_trip_and_index() {
        let store = UploadStore::in_memory();
        store.save_chunk(&sample_chunk("u1", 2)).await.unwrap();
        store.save_chunk(&sample_chunk("u1", 1)).await.unwrap();
        store.save_chunk(&sample_chunk("u2", 1)).await.unwrap();

        let chunks = store.load_chunks("u1").await.unwrap();
        assert_eq!(chunks.len(), 2);
        // Ordered by part number.
        assert_eq!(chunks[0].part_number, 1);
        assert_eq!(chunks[1].part_number, 2);
        assert_eq!(chunks[0].data, vec![1, 2, 3, 4]);

        store.delete_chunks("u1").await.unwrap();
        assert!(store.load_chunks("u1").await.unwrap().is_empty());
        // Other uploads' chunks untouched.
        assert_eq!(store.load_chunks("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chunk_save_is_upsert() {
        let store = UploadStore::in_memory();
        let mut chunk = sample_chunk("u1", 1);
        store.save_chunk(&chunk).await.unwrap();

        chunk.status = ChunkStatus::Failed;
        chunk.attempts = 3;
        chunk.error = Some("503".into());
        store.save_chunk(&chunk).await.unwrap();

        let chunks = store.load_chunks("u1").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].status, ChunkStatus::Failed);
        assert_eq!(chunks[0].attempts, 3);
        assert_eq!(chunks[0].error.as_deref(), Some("503"));
    }

    #[tokio::test]
    async fn metadata_round_trip() {
        let store = UploadStore::in_memory();
        assert!(store.get_metadata("installedAt").await.unwrap().is_none());

        store.set_metadata("installedAt", "123").await.unwrap();
        store.set_metadata("installedAt", "456").await.unwrap();
        assert_eq!(
            store.get_metadata("installedAt").await.unwrap().as_deref(),
            Some("456")
        );
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = UploadStore::new(dir.path());
            store
                .save_upload_state(&sample_state("c1", UploadStatus::Paused))
                .await
                .unwrap();
        }

        // New store over the same directory sees the record.
        let store = UploadStore::new(dir.path());
        let loaded = store.load_upload_state("c1").await.unwrap().unwrap();
        assert_eq!(loaded.status, UploadStatus::Paused);
    }

    #[tokio::test]
    async fn schema_version_recorded() {
        let store = UploadStore::in_memory();
        // Force the lazy open.
        store.set_metadata("k", "v").await.unwrap();
        let version: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                    row.get(0)
                })?)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
