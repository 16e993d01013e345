//! Outbound event sum: everything the worker broadcasts to attached
//! clients.
//!
//! Events are fan-out, not request/response: every attached client sees
//! every event. Upload-scoped events always carry the `contentId` they
//! refer to.

use serde::{Deserialize, Serialize};

use crate::types::{LogLevel, UploadStatus, UploadSummary};

/// An event broadcast by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The control plane accepted the upload and assigned identities.
    #[serde(rename = "INITIATE_UPLOAD_RESPONSE", rename_all = "camelCase")]
    InitiateUploadResponse {
        content_id: String,
        upload_id: String,
        key: String,
    },

    /// Progress snapshot after a part was acknowledged.
    #[serde(rename = "UPLOAD_PROGRESS", rename_all = "camelCase")]
    UploadProgress {
        content_id: String,
        /// Integer percentage 0..=100, monotonic per upload.
        progress: u8,
        uploaded_bytes: u64,
        total_bytes: u64,
        /// Bytes per second over the sliding sample window.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        upload_speed: Option<f64>,
        /// Estimated seconds until completion at the current speed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_remaining: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_connections: Option<usize>,
    },

    /// One part was accepted by the object store.
    #[serde(rename = "CHUNK_UPLOADED", rename_all = "camelCase")]
    ChunkUploaded {
        content_id: String,
        part_number: u32,
        size: u64,
    },

    /// A part attempt failed with a retryable error; the next attempt is
    /// scheduled after `next_attempt_delay` milliseconds.
    #[serde(rename = "RETRYING_CHUNK", rename_all = "camelCase")]
    RetryingChunk {
        content_id: String,
        part_number: u32,
        attempt: u32,
        next_attempt_delay: u64,
    },

    /// All parts uploaded and the multipart session finalized.
    #[serde(rename = "UPLOAD_COMPLETE", rename_all = "camelCase")]
    UploadComplete {
        content_id: String,
        file_url: String,
        /// Wall-clock duration in milliseconds.
        duration: u64,
        total_bytes: u64,
        /// Bytes per second over the whole upload.
        average_speed: f64,
    },

    /// The upload failed and entered the `error` state.
    #[serde(rename = "UPLOAD_ERROR", rename_all = "camelCase")]
    UploadError {
        /// Absent when the failure happened before the control plane
        /// assigned an identity (initiate failure).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_id: Option<String>,
        error: String,
        retryable: bool,
    },

    #[serde(rename = "UPLOAD_PAUSED", rename_all = "camelCase")]
    UploadPaused { content_id: String },

    #[serde(rename = "UPLOAD_CANCELLED", rename_all = "camelCase")]
    UploadCancelled { content_id: String },

    /// Reply to GET_UPLOAD_STATUS, and per-upload notice during
    /// GET_ACTIVE_UPLOADS.
    #[serde(rename = "UPLOAD_STATUS", rename_all = "camelCase")]
    UploadStatus {
        content_id: String,
        status: UploadStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
    },

    /// Snapshot of every non-terminal upload.
    #[serde(rename = "UPLOADS_UPDATE", rename_all = "camelCase")]
    UploadsUpdate { uploads: Vec<UploadSummary> },

    /// Structured log record shipped to clients.
    #[serde(rename = "LOG", rename_all = "camelCase")]
    Log { level: LogLevel, message: String },
}

impl Event {
    /// Convenience constructor for LOG events.
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Event::Log {
            level,
            message: message.into(),
        }
    }

    /// The `contentId` this event refers to, when upload-scoped.
    pub fn content_id(&self) -> Option<&str> {
        match self {
            Event::InitiateUploadResponse { content_id, .. }
            | Event::UploadProgress { content_id, .. }
            | Event::ChunkUploaded { content_id, .. }
            | Event::RetryingChunk { content_id, .. }
            | Event::UploadComplete { content_id, .. }
            | Event::UploadPaused { content_id }
            | Event::UploadCancelled { content_id }
            | Event::UploadStatus { content_id, .. } => Some(content_id),
            Event::UploadError { content_id, .. } => content_id.as_deref(),
            Event::UploadsUpdate { .. } | Event::Log { .. } => None,
        }
    }
}
