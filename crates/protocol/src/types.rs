use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "not_found")]
    NotFound,
}

impl UploadStatus {
    /// Terminal states are never resumed automatically.
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Cancelled)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::InProgress => "in_progress",
            UploadStatus::Paused => "paused",
            UploadStatus::Completed => "completed",
            UploadStatus::Error => "error",
            UploadStatus::Cancelled => "cancelled",
            UploadStatus::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

/// A part the object store has acknowledged, identified by its ETag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub e_tag: String,
    pub size: u64,
}

/// A part as reported by the server's list-parts endpoint.
///
/// The server may omit `size` for parts it has not fully validated yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedPart {
    pub part_number: u32,
    pub e_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Durable per-upload record, keyed by `content_id`.
///
/// `file_path` is the worker-side handle to the source bytes: the file is
/// re-opened by path on every resume, so the record stays usable across a
/// cold restart as long as the path is still readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadState {
    pub content_id: String,
    pub upload_id: String,
    pub key: String,
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub part_size: u64,
    pub max_concurrent_uploads: usize,
    /// Acknowledged parts, append-only. May be out of part-number order
    /// until sorted for completion.
    #[serde(default)]
    pub parts: Vec<CompletedPart>,
    /// Derived percentage 0..=100.
    #[serde(default)]
    pub progress: u8,
    pub status: UploadStatus,
    /// Epoch milliseconds at initiate time.
    pub start_time: u64,
    #[serde(default)]
    pub accelerated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

impl UploadState {
    /// Number of parts this upload splits into.
    pub fn total_parts(&self) -> u32 {
        debug_assert!(self.part_size > 0);
        self.file_size.div_ceil(self.part_size) as u32
    }

    /// Bytes acknowledged so far, clamped to the file size.
    ///
    /// Summing acknowledged part sizes (rather than `parts × part_size`)
    /// keeps the final short part from overcounting.
    pub fn uploaded_bytes(&self) -> u64 {
        let sum: u64 = self.parts.iter().map(|p| p.size).sum();
        sum.min(self.file_size)
    }

    /// Part numbers already acknowledged.
    pub fn completed_part_numbers(&self) -> BTreeSet<u32> {
        self.parts.iter().map(|p| p.part_number).collect()
    }

    /// Recomputes `progress` from the acknowledged part count, rounded to
    /// the nearest percent.
    pub fn recompute_progress(&mut self) {
        let total = self.total_parts() as u64;
        if total == 0 {
            self.progress = 100;
            return;
        }
        let done = self.completed_part_numbers().len() as u64;
        self.progress = ((done * 100 + total / 2) / total).min(100) as u8;
    }

    /// Byte range of the given 1-based part: `[start, end)`.
    pub fn part_range(&self, part_number: u32) -> (u64, u64) {
        let start = (part_number as u64 - 1) * self.part_size;
        let end = (start + self.part_size).min(self.file_size);
        (start, end)
    }
}

/// Chunk-level durability record for queued-but-not-yet-uploaded parts.
///
/// Only written when chunk bytes must outlive the source file handle; an
/// upload whose source path is still readable never needs these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunk {
    pub id: String,
    pub upload_id: String,
    pub part_number: u32,
    pub size: u64,
    /// Raw chunk bytes; base64 on the wire to match the server's `[]byte`
    /// encoding.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub status: ChunkStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State of a durably queued chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Queued,
    Uploading,
    Uploaded,
    Failed,
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChunkStatus::Queued => "queued",
            ChunkStatus::Uploading => "uploading",
            ChunkStatus::Uploaded => "uploaded",
            ChunkStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-upload retry overrides accepted on START_UPLOAD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RetryOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

/// Per-upload chunking overrides accepted on START_UPLOAD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_uploads: Option<usize>,
}

/// Compact per-upload view for UPLOADS_UPDATE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub content_id: String,
    pub file_name: String,
    pub status: UploadStatus,
    pub progress: u8,
}

impl From<&UploadState> for UploadSummary {
    fn from(state: &UploadState) -> Self {
        Self {
            content_id: state.content_id.clone(),
            file_name: state.file_name.clone(),
            status: state.status,
            progress: state.progress,
        }
    }
}

/// Severity of a LOG event shipped to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// Custom base64 serde module matching the server's `[]byte` ↔ base64
/// encoding.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state(file_size: u64, part_size: u64) -> UploadState {
        UploadState {
            content_id: "c1".into(),
            upload_id: "u1".into(),
            key: "videos/c1.mp4".into(),
            file_path: PathBuf::from("/tmp/sample.mp4"),
            file_name: "sample.mp4".into(),
            file_size,
            file_type: "video/mp4".into(),
            part_size,
            max_concurrent_uploads: 5,
            parts: Vec::new(),
            progress: 0,
            status: UploadStatus::InProgress,
            start_time: 1_700_000_000_000,
            accelerated: false,
            error: None,
            file_url: None,
        }
    }

    #[test]
    fn total_parts_rounds_up() {
        assert_eq!(sample_state(25, 10).total_parts(), 3);
        assert_eq!(sample_state(30, 10).total_parts(), 3);
        assert_eq!(sample_state(31, 10).total_parts(), 4);
        assert_eq!(sample_state(1, 10).total_parts(), 1);
    }

    #[test]
    fn part_range_clamps_final_part() {
        let state = sample_state(25, 10);
        assert_eq!(state.part_range(1), (0, 10));
        assert_eq!(state.part_range(2), (10, 20));
        assert_eq!(state.part_range(3), (20, 25));
    }

    #[test]
    fn uploaded_bytes_sums_part_sizes() {
        let mut state = sample_state(25, 10);
        state.parts.push(CompletedPart {
            part_number: 1,
            e_tag: "a".into(),
            size: 10,
        });
        state.parts.push(CompletedPart {
            part_number: 3,
            e_tag: "c".into(),
            size: 5,
        });
        assert_eq!(state.uploaded_bytes(), 15);
    }

    #[test]
    fn uploaded_bytes_never_exceeds_file_size() {
        let mut state = sample_state(25, 10);
        for n in 1..=3 {
            state.parts.push(CompletedPart {
                part_number: n,
                e_tag: format!("e{n}"),
                size: 10,
            });
        }
        // 3 × 10 = 30 raw, clamped to the 25-byte file.
        assert_eq!(state.uploaded_bytes(), 25);
    }

    #[test]
    fn progress_tracks_completed_parts() {
        let mut state = sample_state(25, 10);
        state.recompute_progress();
        assert_eq!(state.progress, 0);

        state.parts.push(CompletedPart {
            part_number: 1,
            e_tag: "a".into(),
            size: 10,
        });
        state.recompute_progress();
        assert_eq!(state.progress, 33);

        state.parts.push(CompletedPart {
            part_number: 2,
            e_tag: "b".into(),
            size: 10,
        });
        state.recompute_progress();
        assert_eq!(state.progress, 67);

        state.parts.push(CompletedPart {
            part_number: 3,
            e_tag: "c".into(),
            size: 5,
        });
        state.recompute_progress();
        assert_eq!(state.progress, 100);
    }

    #[test]
    fn state_json_uses_camel_case() {
        let state = sample_state(25, 10);
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"contentId\":\"c1\""));
        assert!(json.contains("\"fileSize\":25"));
        assert!(json.contains("\"partSize\":10"));
        assert!(json.contains("\"status\":\"in_progress\""));
        // Absent optionals are omitted entirely.
        assert!(!json.contains("error"));
        assert!(!json.contains("fileUrl"));
    }

    #[test]
    fn completed_part_etag_field_name() {
        let part = CompletedPart {
            part_number: 2,
            e_tag: "abc123".into(),
            size: 1024,
        };
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains("\"partNumber\":2"));
        assert!(json.contains("\"eTag\":\"abc123\""));
    }

    #[test]
    fn listed_part_size_optional() {
        let json = r#"{"partNumber":1,"eTag":"x"}"#;
        let part: ListedPart = serde_json::from_str(json).unwrap();
        assert_eq!(part.part_number, 1);
        assert!(part.size.is_none());
    }

    #[test]
    fn chunk_data_base64_roundtrip() {
        let chunk = UploadChunk {
            id: "u1:1".into(),
            upload_id: "u1".into(),
            part_number: 1,
            size: 5,
            data: vec![0x48, 0x65, 0x6c, 0x6c, 0x6f],
            status: ChunkStatus::Queued,
            attempts: 0,
            last_attempt: None,
            error: None,
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("SGVsbG8="));
        let parsed: UploadChunk = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.data, chunk.data);
    }

    #[test]
    fn status_terminality() {
        assert!(UploadStatus::Completed.is_terminal());
        assert!(UploadStatus::Cancelled.is_terminal());
        assert!(!UploadStatus::Error.is_terminal());
        assert!(!UploadStatus::Paused.is_terminal());
        assert!(!UploadStatus::InProgress.is_terminal());
    }

    #[test]
    fn summary_from_state() {
        let mut state = sample_state(25, 10);
        state.progress = 66;
        let summary = UploadSummary::from(&state);
        assert_eq!(summary.content_id, "c1");
        assert_eq!(summary.status, UploadStatus::InProgress);
        assert_eq!(summary.progress, 66);
    }
}
