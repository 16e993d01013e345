//! Engine command handlers.
//!
//! Each inbound command maps to one handler; handlers are the only code
//! that mutates the active-upload registry, and every state transition is
//! persisted before the corresponding event is broadcast.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use hoist_control::{ControlPlane, InitiateUpload, qualifies_for_acceleration};
use hoist_protocol::{
    ChunkOverrides, Command, Event, LogLevel, RetryOverrides, UploadState, UploadStatus,
    UploadSummary,
};
use hoist_store::UploadStore;

use crate::config::WorkerConfig;
use crate::registry::Registry;
use crate::source::{FileSource, FsFileSource};
use crate::{driver, now_ms};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The upload engine: registry owner, part scheduler, event source.
pub struct UploadEngine {
    config: WorkerConfig,
    store: Arc<UploadStore>,
    api: Arc<dyn ControlPlane>,
    events: broadcast::Sender<Event>,
    registry: Registry,
    /// Back-reference handed to spawned drive tasks.
    self_ref: Weak<UploadEngine>,
}

impl UploadEngine {
    pub fn new(
        config: WorkerConfig,
        store: Arc<UploadStore>,
        api: Arc<dyn ControlPlane>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new_cyclic(|self_ref| Self {
            config,
            store,
            api,
            events,
            registry: Registry::default(),
            self_ref: self_ref.clone(),
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("engine dropped while in use")
    }

    /// Attaches a new client to the outbound event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Broadcasts an event to every attached client. Zero receivers is
    /// not an error: events are fire-and-forget fan-out.
    pub(crate) fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    pub(crate) fn store(&self) -> &UploadStore {
        &self.store
    }

    pub(crate) fn api_arc(&self) -> Arc<dyn ControlPlane> {
        Arc::clone(&self.api)
    }

    pub(crate) fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Dispatches one decoded command. Exhaustive over the inbound sum:
    /// a new command variant fails compilation here until handled.
    pub async fn handle_command(&self, command: Command) {
        match command {
            Command::StartUpload {
                file,
                file_name,
                duration,
                file_type,
                retry_config,
                chunk_config,
            } => {
                self.start_upload(file, file_name, duration, file_type, retry_config, chunk_config)
                    .await;
            }
            Command::ResumeUpload { content_id } => self.resume_upload(&content_id).await,
            Command::PauseUpload { content_id } => self.pause_upload(&content_id).await,
            Command::CancelUpload { content_id } => self.cancel_upload(&content_id).await,
            Command::GetUploadStatus { content_id } => self.get_upload_status(&content_id).await,
            Command::GetActiveUploads => self.get_active_uploads().await,
            Command::Heartbeat => debug!("heartbeat"),
        }
    }

    /// START_UPLOAD: initiate a session, register the upload, begin
    /// driving parts.
    #[allow(clippy::too_many_arguments)]
    pub async fn start_upload(
        &self,
        file: PathBuf,
        file_name: Option<String>,
        duration: f64,
        file_type: String,
        retry_config: Option<RetryOverrides>,
        chunk_config: Option<ChunkOverrides>,
    ) {
        let source = match FsFileSource::open(&file) {
            Ok(source) => Arc::new(source),
            Err(e) => {
                return self.reject_start(format!("cannot open {}: {e}", file.display()));
            }
        };
        let file_size = source.len();
        if file_size == 0 {
            return self.reject_start(format!("{} is empty", file.display()));
        }
        if file_size > self.config.max_file_size {
            return self.reject_start(format!(
                "file is {file_size} bytes, above the {} byte limit",
                self.config.max_file_size
            ));
        }
        if !self.config.is_type_allowed(&file_type) {
            return self.reject_start(format!("file type {file_type} is not allowed"));
        }

        let file_name = file_name
            .or_else(|| file.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "upload.bin".to_string());

        let use_acceleration = qualifies_for_acceleration(
            self.config.acceleration.enabled,
            file_size,
            self.config.acceleration.min_size,
        );

        let init = match self
            .api
            .initiate_multipart_upload(InitiateUpload {
                file_name: file_name.clone(),
                file_type: file_type.clone(),
                size: file_size,
                duration,
                use_acceleration,
            })
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "initiate failed");
                self.emit(Event::log(LogLevel::Error, format!("initiate failed: {e}")));
                self.emit(Event::UploadError {
                    content_id: None,
                    error: e.to_string(),
                    retryable: false,
                });
                return;
            }
        };

        let content_id = init.content.id.clone();
        let acceleration_endpoint = init.acceleration_endpoint.clone();
        info!(content_id = %content_id, upload_id = %init.upload_id, "upload initiated");
        self.emit(Event::InitiateUploadResponse {
            content_id: content_id.clone(),
            upload_id: init.upload_id.clone(),
            key: init.key.clone(),
        });

        let chunk = chunk_config.unwrap_or_default();
        let state = UploadState {
            content_id: content_id.clone(),
            upload_id: init.upload_id,
            key: init.key,
            file_path: file,
            file_name,
            file_size,
            file_type,
            part_size: chunk
                .part_size
                .filter(|&s| s > 0)
                .unwrap_or(self.config.part_size),
            max_concurrent_uploads: chunk
                .max_concurrent_uploads
                .unwrap_or(self.config.max_concurrent_uploads),
            parts: Vec::new(),
            progress: 0,
            status: UploadStatus::InProgress,
            start_time: now_ms(),
            accelerated: use_acceleration && acceleration_endpoint.is_some(),
            error: None,
            file_url: None,
        };

        let Some(cancel) = self.registry.insert(&content_id) else {
            warn!(content_id = %content_id, "upload already active, ignoring duplicate start");
            return;
        };

        self.persist_best_effort(&state).await;

        let retry = self.config.retry.policy_with(retry_config);
        driver::spawn(
            self.arc(),
            state,
            source,
            cancel,
            acceleration_endpoint,
            retry,
        );
    }

    /// RESUME_UPLOAD: re-open the source, transition to `in_progress`,
    /// drive the remaining parts. A no-op for already-active uploads.
    pub async fn resume_upload(&self, content_id: &str) {
        if self.registry.contains(content_id) {
            debug!(content_id, "resume ignored, upload already active");
            return;
        }

        let mut state = match self.store.load_upload_state(content_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                self.emit(Event::log(
                    LogLevel::Error,
                    format!("cannot resume unknown upload {content_id}"),
                ));
                self.emit(Event::UploadError {
                    content_id: Some(content_id.to_string()),
                    error: "upload not found".into(),
                    retryable: false,
                });
                return;
            }
            Err(e) => {
                warn!(content_id, error = %e, "failed to load upload state");
                self.emit(Event::log(LogLevel::Error, format!("storage error: {e}")));
                return;
            }
        };

        if state.status.is_terminal() {
            debug!(content_id, status = %state.status, "resume ignored, upload is terminal");
            self.emit(Event::UploadStatus {
                content_id: content_id.to_string(),
                status: state.status,
                progress: Some(state.progress),
            });
            return;
        }

        let source = match FsFileSource::open(&state.file_path) {
            Ok(source) => Arc::new(source),
            Err(e) => {
                // Cold restart with the source gone: park the upload until
                // the foreground re-attaches the file.
                state.status = UploadStatus::Paused;
                state.error = Some(format!("source file unavailable: {e}"));
                self.persist_best_effort(&state).await;
                self.emit(Event::log(
                    LogLevel::Warn,
                    format!("upload {content_id} paused: source file unavailable"),
                ));
                self.emit(Event::UploadPaused {
                    content_id: content_id.to_string(),
                });
                return;
            }
        };

        state.status = UploadStatus::InProgress;
        state.error = None;

        let Some(cancel) = self.registry.insert(content_id) else {
            return;
        };
        self.persist_best_effort(&state).await;
        info!(content_id, progress = state.progress, "upload resumed");

        // The initiate-time acceleration endpoint is not persisted; the
        // driver falls back to the configured default when accelerated.
        let retry = self.config.retry.policy();
        driver::spawn(self.arc(), state, source, cancel, None, retry);
    }

    /// PAUSE_UPLOAD: abort in-flight PUTs and park the upload.
    pub async fn pause_upload(&self, content_id: &str) {
        let token = self.registry.remove(content_id);
        if let Some(token) = &token {
            token.cancel();
        }

        let mut known = token.is_some();
        match self.store.load_upload_state(content_id).await {
            Ok(Some(mut state)) if !state.status.is_terminal() => {
                known = true;
                state.status = UploadStatus::Paused;
                self.persist_best_effort(&state).await;
            }
            Ok(Some(_)) => known = true,
            Ok(None) => {}
            Err(e) => warn!(content_id, error = %e, "failed to persist pause"),
        }

        if !known {
            self.emit(Event::log(
                LogLevel::Warn,
                format!("pause for unknown upload {content_id}"),
            ));
            return;
        }

        info!(content_id, "upload paused");
        self.emit(Event::UploadPaused {
            content_id: content_id.to_string(),
        });
    }

    /// CANCEL_UPLOAD: abort in-flight PUTs, purge persisted state, abort
    /// the session server-side (best-effort).
    pub async fn cancel_upload(&self, content_id: &str) {
        let token = self.registry.remove(content_id);
        if let Some(token) = &token {
            token.cancel();
        }

        let state = match self.store.load_upload_state(content_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(content_id, error = %e, "failed to load upload state for cancel");
                None
            }
        };

        if token.is_none() && state.is_none() {
            self.emit(Event::log(
                LogLevel::Warn,
                format!("cancel for unknown upload {content_id}"),
            ));
            return;
        }

        if let Err(e) = self.store.delete_upload_state(content_id).await {
            warn!(content_id, error = %e, "failed to delete upload state");
        }

        if let Some(state) = &state {
            if let Err(e) = self.store.delete_chunks(&state.upload_id).await {
                warn!(content_id, error = %e, "failed to delete chunks");
            }
            // Local teardown proceeds even when the server-side abort fails.
            if let Err(e) = self
                .api
                .cancel_upload(&state.key, &state.upload_id, content_id, state.accelerated)
                .await
            {
                warn!(content_id, error = %e, "server-side cancel failed");
                self.emit(Event::log(
                    LogLevel::Warn,
                    format!("server-side cancel failed: {e}"),
                ));
            }
        }

        info!(content_id, "upload cancelled");
        self.emit(Event::UploadCancelled {
            content_id: content_id.to_string(),
        });
    }

    /// GET_UPLOAD_STATUS: report the persisted status, or `not_found`.
    pub async fn get_upload_status(&self, content_id: &str) {
        match self.store.load_upload_state(content_id).await {
            Ok(Some(state)) => self.emit(Event::UploadStatus {
                content_id: content_id.to_string(),
                status: state.status,
                progress: Some(state.progress),
            }),
            Ok(None) => self.emit(Event::UploadStatus {
                content_id: content_id.to_string(),
                status: UploadStatus::NotFound,
                progress: None,
            }),
            Err(e) => {
                warn!(content_id, error = %e, "failed to load upload state");
                self.emit(Event::log(LogLevel::Error, format!("storage error: {e}")));
            }
        }
    }

    /// GET_ACTIVE_UPLOADS: snapshot every non-terminal upload, then
    /// schedule a resume for each (idempotent through the registry).
    pub async fn get_active_uploads(&self) {
        let states = match self.store.load_all_upload_states().await {
            Ok(states) => states,
            Err(e) => {
                warn!(error = %e, "failed to scan upload states");
                self.emit(Event::log(LogLevel::Error, format!("storage error: {e}")));
                return;
            }
        };

        let active: Vec<UploadState> = states
            .into_iter()
            .filter(|s| matches!(s.status, UploadStatus::InProgress | UploadStatus::Paused))
            .collect();

        self.emit(Event::UploadsUpdate {
            uploads: active.iter().map(UploadSummary::from).collect(),
        });

        for state in active {
            self.emit(Event::UploadStatus {
                content_id: state.content_id.clone(),
                status: state.status,
                progress: Some(state.progress),
            });
            self.resume_upload(&state.content_id).await;
        }
    }

    fn reject_start(&self, message: String) {
        warn!(%message, "rejecting START_UPLOAD");
        self.emit(Event::log(LogLevel::Error, message.clone()));
        self.emit(Event::UploadError {
            content_id: None,
            error: message,
            retryable: false,
        });
    }

    /// Persists a state snapshot; storage failure is logged and shipped
    /// to clients but never kills the upload.
    pub(crate) async fn persist_best_effort(&self, state: &UploadState) {
        if let Err(e) = self.store.save_upload_state(state).await {
            warn!(content_id = %state.content_id, error = %e, "state persist failed, continuing in memory");
            self.emit(Event::log(
                LogLevel::Warn,
                format!("state persist failed: {e}"),
            ));
        }
    }
}
