//! Inbound command sum: everything a foreground client may ask the worker
//! to do.
//!
//! Commands arrive as flat JSON objects with a `type` discriminator.
//! Decoding doubles as the shape guard: a payload that does not match one
//! of the variants below is rejected with a [`DecodeError`] and never
//! reaches a handler.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{ChunkOverrides, RetryOverrides};

/// A command posted by a foreground client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    /// Begin a new upload of the file at `file`.
    #[serde(rename = "START_UPLOAD", rename_all = "camelCase")]
    StartUpload {
        /// Path to the source file. Stands in for the browser `File`
        /// handle; must stay readable for the lifetime of the upload.
        file: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        /// Media duration in seconds, forwarded to the control plane.
        duration: f64,
        file_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_config: Option<RetryOverrides>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_config: Option<ChunkOverrides>,
    },

    /// Resume a paused or failed upload.
    #[serde(rename = "RESUME_UPLOAD", rename_all = "camelCase")]
    ResumeUpload { content_id: String },

    /// Pause an active upload; in-flight part PUTs abort.
    #[serde(rename = "PAUSE_UPLOAD", rename_all = "camelCase")]
    PauseUpload { content_id: String },

    /// Cancel an upload and purge its persisted state.
    #[serde(rename = "CANCEL_UPLOAD", rename_all = "camelCase")]
    CancelUpload { content_id: String },

    /// Query the persisted status of one upload.
    #[serde(rename = "GET_UPLOAD_STATUS", rename_all = "camelCase")]
    GetUploadStatus { content_id: String },

    /// Report and resume every non-terminal upload.
    #[serde(rename = "GET_ACTIVE_UPLOADS")]
    GetActiveUploads,

    /// Client keepalive. No effect beyond confirming the worker is alive.
    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
}

/// Every recognized command discriminator. Kept adjacent to the enum so a
/// new variant is added to both or the decode tests fail.
const KNOWN_TYPES: [&str; 7] = [
    "START_UPLOAD",
    "RESUME_UPLOAD",
    "PAUSE_UPLOAD",
    "CANCEL_UPLOAD",
    "GET_UPLOAD_STATUS",
    "GET_ACTIVE_UPLOADS",
    "HEARTBEAT",
];

/// Why an inbound message was rejected.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("message has no type discriminator")]
    MissingType,

    #[error("unknown command type: {0}")]
    UnknownType(String),

    #[error("malformed command payload: {0}")]
    Shape(#[source] serde_json::Error),
}

impl Command {
    /// Decodes one inbound message.
    ///
    /// The failure modes are split so the bus can log syntax errors,
    /// unknown command types, and bad payloads differently.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_str(raw).map_err(DecodeError::Json)?;
        let ty = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(DecodeError::MissingType)?;
        if !KNOWN_TYPES.contains(&ty) {
            return Err(DecodeError::UnknownType(ty.to_string()));
        }
        serde_json::from_value(value).map_err(DecodeError::Shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_upload_decodes() {
        let raw = r#"{
            "type": "START_UPLOAD",
            "file": "/media/clip.mp4",
            "duration": 12.5,
            "fileType": "video/mp4"
        }"#;
        let cmd = Command::decode(raw).unwrap();
        match cmd {
            Command::StartUpload {
                file,
                file_name,
                duration,
                file_type,
                retry_config,
                chunk_config,
            } => {
                assert_eq!(file, PathBuf::from("/media/clip.mp4"));
                assert!(file_name.is_none());
                assert_eq!(duration, 12.5);
                assert_eq!(file_type, "video/mp4");
                assert!(retry_config.is_none());
                assert!(chunk_config.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn start_upload_with_overrides() {
        let raw = r#"{
            "type": "START_UPLOAD",
            "file": "/media/clip.mp4",
            "duration": 1.0,
            "fileType": "video/mp4",
            "retryConfig": {"attempts": 5},
            "chunkConfig": {"partSize": 5242880, "maxConcurrentUploads": 2}
        }"#;
        let Command::StartUpload {
            retry_config,
            chunk_config,
            ..
        } = Command::decode(raw).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(retry_config.unwrap().attempts, Some(5));
        let chunk = chunk_config.unwrap();
        assert_eq!(chunk.part_size, Some(5_242_880));
        assert_eq!(chunk.max_concurrent_uploads, Some(2));
    }

    #[test]
    fn content_id_commands_decode() {
        for (ty, expect) in [
            ("RESUME_UPLOAD", "resume"),
            ("PAUSE_UPLOAD", "pause"),
            ("CANCEL_UPLOAD", "cancel"),
            ("GET_UPLOAD_STATUS", "status"),
        ] {
            let raw = format!(r#"{{"type":"{ty}","contentId":"c9"}}"#);
            let cmd = Command::decode(&raw).unwrap();
            let id = match &cmd {
                Command::ResumeUpload { content_id } => content_id,
                Command::PauseUpload { content_id } => content_id,
                Command::CancelUpload { content_id } => content_id,
                Command::GetUploadStatus { content_id } => content_id,
                other => panic!("{expect}: wrong variant {other:?}"),
            };
            assert_eq!(id, "c9");
        }
    }

    #[test]
    fn bare_commands_decode() {
        assert_eq!(
            Command::decode(r#"{"type":"GET_ACTIVE_UPLOADS"}"#).unwrap(),
            Command::GetActiveUploads
        );
        assert_eq!(
            Command::decode(r#"{"type":"HEARTBEAT"}"#).unwrap(),
            Command::Heartbeat
        );
    }

    #[test]
    fn invalid_json_is_json_error() {
        let err = Command::decode("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn unknown_type_is_its_own_error() {
        let err = Command::decode(r#"{"type":"SELF_DESTRUCT"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(ty) if ty == "SELF_DESTRUCT"));
    }

    #[test]
    fn missing_type_is_rejected() {
        let err = Command::decode(r#"{"contentId":"c1"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingType));
    }

    #[test]
    fn missing_required_field_is_shape_error() {
        // PAUSE_UPLOAD without contentId.
        let err = Command::decode(r#"{"type":"PAUSE_UPLOAD"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Shape(_)));
    }

    #[test]
    fn every_variant_has_a_known_type() {
        // Serialize each variant and check its discriminator is listed.
        let variants = [
            serde_json::to_value(Command::GetActiveUploads).unwrap(),
            serde_json::to_value(Command::Heartbeat).unwrap(),
            serde_json::to_value(Command::PauseUpload {
                content_id: "c".into(),
            })
            .unwrap(),
            serde_json::to_value(Command::ResumeUpload {
                content_id: "c".into(),
            })
            .unwrap(),
            serde_json::to_value(Command::CancelUpload {
                content_id: "c".into(),
            })
            .unwrap(),
            serde_json::to_value(Command::GetUploadStatus {
                content_id: "c".into(),
            })
            .unwrap(),
            serde_json::to_value(Command::StartUpload {
                file: PathBuf::from("/f"),
                file_name: None,
                duration: 0.0,
                file_type: "video/mp4".into(),
                retry_config: None,
                chunk_config: None,
            })
            .unwrap(),
        ];
        for v in variants {
            let ty = v.get("type").and_then(|t| t.as_str()).unwrap();
            assert!(KNOWN_TYPES.contains(&ty), "{ty} missing from KNOWN_TYPES");
        }
    }

    #[test]
    fn encode_round_trip() {
        let cmd = Command::CancelUpload {
            content_id: "c1".into(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"CANCEL_UPLOAD\""));
        assert!(json.contains("\"contentId\":\"c1\""));
        assert_eq!(Command::decode(&json).unwrap(), cmd);
    }
}
