//! Worker lifecycle: install, activate, network-online.
//!
//! On activate the registry is hydrated from the store and every upload
//! that was `in_progress` when the worker last stopped is resumed. Coming
//! back online additionally retries paused uploads. Both paths go through
//! the resume handler, whose registry guard makes a second attempt a
//! no-op.

use std::sync::Arc;

use tracing::{info, warn};

use hoist_protocol::UploadStatus;

use crate::engine::UploadEngine;
use crate::now_ms;

/// Host-delivered lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Install,
    Activate,
    Online,
}

/// Reacts to lifecycle events by hydrating and resuming uploads.
pub struct LifecycleController {
    engine: Arc<UploadEngine>,
}

impl LifecycleController {
    pub fn new(engine: Arc<UploadEngine>) -> Self {
        Self { engine }
    }

    pub async fn handle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Install => self.install().await,
            LifecycleEvent::Activate => self.load_ongoing_uploads(false).await,
            LifecycleEvent::Online => self.load_ongoing_uploads(true).await,
        }
    }

    /// Claims the store eagerly so the first command never pays the
    /// open-and-migrate cost, and stamps the install time.
    async fn install(&self) {
        if let Err(e) = self
            .engine
            .store()
            .set_metadata("installedAt", &now_ms().to_string())
            .await
        {
            warn!(error = %e, "failed to stamp install time");
        }
        info!("worker installed");
    }

    /// Resumes every persisted upload that should be running.
    ///
    /// `include_paused` is false on activate (paused uploads wait for an
    /// explicit resume) and true when the network comes back.
    async fn load_ongoing_uploads(&self, include_paused: bool) {
        let states = match self.engine.store().load_all_upload_states().await {
            Ok(states) => states,
            Err(e) => {
                warn!(error = %e, "failed to hydrate upload registry");
                return;
            }
        };

        let mut resumed = 0usize;
        for state in states {
            let eligible = match state.status {
                UploadStatus::InProgress => true,
                UploadStatus::Paused => include_paused,
                _ => false,
            };
            if eligible {
                self.engine.resume_upload(&state.content_id).await;
                resumed += 1;
            }
        }
        info!(resumed, include_paused, "ongoing uploads loaded");
    }
}
