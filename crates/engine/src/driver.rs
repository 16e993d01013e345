//! Part-driving loop: reconcile, schedule, retry, finalize.
//!
//! One drive task per active upload. Worker subtasks only upload bytes
//! and report results; every state mutation and event emission happens in
//! the drive loop, so transitions stay totally ordered per upload.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hoist_control::{ApiError, ControlPlane, RetryPolicy, accelerate_url};
use hoist_protocol::{CompletedPart, Event, ListedPart, UploadState, UploadStatus};

use crate::engine::UploadEngine;
use crate::now_ms;
use crate::source::FileSource;
use crate::speed::SpeedTracker;

enum DriveOutcome {
    /// All parts acknowledged and the session finalized.
    Finished { location: String },
    /// The upload's cancel token fired; the pause/cancel handler owns the
    /// state transition and events.
    Cancelled,
}

pub(crate) fn spawn(
    engine: Arc<UploadEngine>,
    state: UploadState,
    source: Arc<dyn FileSource>,
    cancel: CancellationToken,
    acceleration_endpoint: Option<String>,
    retry: RetryPolicy,
) {
    tokio::spawn(drive(
        engine,
        state,
        source,
        cancel,
        acceleration_endpoint,
        retry,
    ));
}

async fn drive(
    engine: Arc<UploadEngine>,
    mut state: UploadState,
    source: Arc<dyn FileSource>,
    cancel: CancellationToken,
    acceleration_endpoint: Option<String>,
    retry: RetryPolicy,
) {
    let content_id = state.content_id.clone();

    // The endpoint from initiate wins; on resume it is no longer known
    // and the configured default stands in.
    let endpoint = if state.accelerated {
        acceleration_endpoint
            .or_else(|| Some(engine.config().acceleration.default_endpoint.clone()))
    } else {
        None
    };

    match run(&engine, &mut state, source, &cancel, endpoint, retry).await {
        Ok(DriveOutcome::Finished { location }) => {
            state.status = UploadStatus::Completed;
            state.progress = 100;
            state.error = None;
            state.file_url = Some(location.clone());
            engine.persist_best_effort(&state).await;

            // Any durably queued chunks are no longer needed.
            if let Err(e) = engine.store().delete_chunks(&state.upload_id).await {
                warn!(content_id = %content_id, error = %e, "failed to drop queued chunks");
            }

            let duration = now_ms().saturating_sub(state.start_time);
            let average_speed = if duration > 0 {
                state.file_size as f64 / (duration as f64 / 1000.0)
            } else {
                0.0
            };
            info!(content_id = %content_id, duration_ms = duration, "upload complete");
            engine.emit(Event::UploadComplete {
                content_id: content_id.clone(),
                file_url: location,
                duration,
                total_bytes: state.file_size,
                average_speed,
            });
            engine.registry().remove(&content_id);
        }
        Ok(DriveOutcome::Cancelled) => {
            debug!(content_id = %content_id, "drive stopped by cancellation");
        }
        Err(e) => {
            warn!(content_id = %content_id, error = %e, "upload failed");
            state.status = UploadStatus::Error;
            state.error = Some(e.to_string());
            engine.persist_best_effort(&state).await;
            engine.emit(Event::UploadError {
                content_id: Some(content_id.clone()),
                error: e.to_string(),
                retryable: e.is_retryable(),
            });
            engine.registry().remove(&content_id);
        }
    }
}

async fn run(
    engine: &Arc<UploadEngine>,
    state: &mut UploadState,
    source: Arc<dyn FileSource>,
    cancel: &CancellationToken,
    endpoint: Option<String>,
    retry: RetryPolicy,
) -> Result<DriveOutcome, ApiError> {
    let total_parts = state.total_parts();
    let api = engine.api_arc();

    // Reconcile with the server before any re-PUT: the authoritative set
    // of complete parts is the union of the server's list and ours.
    match api.list_uploaded_parts(&state.key, &state.upload_id).await {
        Ok(listed) => {
            if merge_listed_parts(state, &listed) {
                state.recompute_progress();
                if !cancel.is_cancelled() {
                    engine.persist_best_effort(state).await;
                }
            }
        }
        Err(ApiError::Cancelled) => return Ok(DriveOutcome::Cancelled),
        Err(e) => {
            warn!(
                content_id = %state.content_id,
                error = %e,
                "list-parts reconcile failed, using local part list"
            );
        }
    }

    let done = state.completed_part_numbers();
    let pending: Vec<u32> = (1..=total_parts).filter(|n| !done.contains(n)).collect();
    debug!(
        content_id = %state.content_id,
        total_parts,
        pending = pending.len(),
        "driving parts"
    );

    let speed = Arc::new(SpeedTracker::new());
    let semaphore = Arc::new(Semaphore::new(state.max_concurrent_uploads.max(1)));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let mut tasks: JoinSet<Result<CompletedPart, ApiError>> = JoinSet::new();

    for part_number in pending {
        let job = PartJob {
            engine: Arc::clone(engine),
            api: Arc::clone(&api),
            source: Arc::clone(&source),
            semaphore: Arc::clone(&semaphore),
            in_flight: Arc::clone(&in_flight),
            cancel: cancel.clone(),
            retry,
            content_id: state.content_id.clone(),
            upload_id: state.upload_id.clone(),
            key: state.key.clone(),
            accelerated: state.accelerated,
            endpoint: endpoint.clone(),
            part_number,
            range: state.part_range(part_number),
        };
        tasks.spawn(job.run());
    }

    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(ApiError::Fatal(format!("part task failed: {e}"))),
        };
        match result {
            Ok(part) => {
                state.parts.push(part.clone());
                state.recompute_progress();
                speed.add_sample(part.size);

                // A pause/cancel that lands between the part finishing and
                // this point owns the persisted status; do not overwrite it.
                if cancel.is_cancelled() {
                    continue;
                }
                engine.persist_best_effort(state).await;
                engine.emit(Event::ChunkUploaded {
                    content_id: state.content_id.clone(),
                    part_number: part.part_number,
                    size: part.size,
                });
                let uploaded_bytes = state.uploaded_bytes();
                engine.emit(Event::UploadProgress {
                    content_id: state.content_id.clone(),
                    progress: state.progress,
                    uploaded_bytes,
                    total_bytes: state.file_size,
                    upload_speed: speed.bytes_per_second(),
                    time_remaining: speed.eta_seconds(state.file_size - uploaded_bytes),
                    active_connections: Some(in_flight.load(Ordering::Relaxed)),
                });
            }
            Err(ApiError::Cancelled) => {
                tasks.shutdown().await;
                return Ok(DriveOutcome::Cancelled);
            }
            Err(e) => {
                tasks.shutdown().await;
                return Err(e);
            }
        }
    }

    if cancel.is_cancelled() {
        return Ok(DriveOutcome::Cancelled);
    }

    // The server requires an ordered part list; reconcile unions may also
    // have introduced duplicates.
    state.parts.sort_by_key(|p| p.part_number);
    state.parts.dedup_by_key(|p| p.part_number);

    let location = api
        .complete_multipart_upload(
            &state.key,
            &state.upload_id,
            &state.content_id,
            state.parts.clone(),
            state.accelerated,
        )
        .await?;
    Ok(DriveOutcome::Finished { location })
}

/// Adds server-acknowledged parts missing from the local list. Returns
/// whether anything changed.
fn merge_listed_parts(state: &mut UploadState, listed: &[ListedPart]) -> bool {
    let known = state.completed_part_numbers();
    let mut changed = false;
    for part in listed {
        if known.contains(&part.part_number) {
            continue;
        }
        let (start, end) = state.part_range(part.part_number);
        state.parts.push(CompletedPart {
            part_number: part.part_number,
            e_tag: part.e_tag.clone(),
            size: part.size.unwrap_or(end - start),
        });
        changed = true;
    }
    changed
}

/// Everything one part-upload subtask needs.
struct PartJob {
    engine: Arc<UploadEngine>,
    api: Arc<dyn ControlPlane>,
    source: Arc<dyn FileSource>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    cancel: CancellationToken,
    retry: RetryPolicy,
    content_id: String,
    upload_id: String,
    key: String,
    accelerated: bool,
    endpoint: Option<String>,
    part_number: u32,
    range: (u64, u64),
}

impl PartJob {
    async fn run(self) -> Result<CompletedPart, ApiError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ApiError::Cancelled)?;
        if self.cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let result = self.upload_with_retry().await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn upload_with_retry(&self) -> Result<CompletedPart, ApiError> {
        let (start, end) = self.range;
        let len = (end - start) as usize;

        // Read once; the buffer is reused across attempts.
        let source = Arc::clone(&self.source);
        let part_number = self.part_number;
        let bytes = tokio::task::spawn_blocking(move || source.read_range(start, len))
            .await
            .map_err(|e| ApiError::Fatal(format!("read task failed: {e}")))?
            .map_err(|e| ApiError::Fatal(format!("failed to read part {part_number}: {e}")))?;

        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }
            match self.attempt_once(bytes.clone()).await {
                Ok(part) => return Ok(part),
                Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                    attempt += 1;
                    let reported = self.retry.delay_for_attempt(attempt);
                    debug!(
                        content_id = %self.content_id,
                        part_number = self.part_number,
                        attempt,
                        delay_ms = reported.as_millis() as u64,
                        error = %e,
                        "retrying part"
                    );
                    self.engine.emit(Event::RetryingChunk {
                        content_id: self.content_id.clone(),
                        part_number: self.part_number,
                        attempt,
                        next_attempt_delay: reported.as_millis() as u64,
                    });
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry.jittered_delay(attempt)) => {}
                        _ = self.cancel.cancelled() => return Err(ApiError::Cancelled),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_once(&self, bytes: bytes::Bytes) -> Result<CompletedPart, ApiError> {
        let url = self
            .api
            .get_signed_url(self.part_number, &self.upload_id, &self.key, self.accelerated)
            .await?;
        let url = match (&self.endpoint, self.accelerated) {
            (Some(endpoint), true) => accelerate_url(&url, endpoint),
            _ => url,
        };
        self.api
            .upload_part(&url, self.part_number, bytes, self.cancel.clone())
            .await
    }
}
