//! Message bus between the worker and its foreground clients.
//!
//! Inbound messages are commands; outbound messages are events, broadcast
//! to every subscriber. Decoding is the shape guard: malformed messages
//! are logged and dropped, unknown command types are logged as warnings.
//! Nothing invalid reaches a handler.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use hoist_protocol::{Command, DecodeError, Event, LogLevel};

use crate::engine::UploadEngine;

/// Fan-out message bus over one engine.
pub struct MessageBus {
    engine: Arc<UploadEngine>,
}

impl MessageBus {
    pub fn new(engine: Arc<UploadEngine>) -> Self {
        Self { engine }
    }

    /// Attaches a client to the outbound event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.engine.subscribe()
    }

    /// Decodes and dispatches one raw inbound message.
    pub async fn dispatch_raw(&self, raw: &str) {
        match Command::decode(raw) {
            Ok(command) => self.engine.handle_command(command).await,
            Err(DecodeError::UnknownType(ty)) => {
                warn!(command_type = %ty, "dropping unknown command");
                self.engine.emit(Event::log(
                    LogLevel::Warn,
                    format!("unknown command type: {ty}"),
                ));
            }
            Err(e) => {
                warn!(error = %e, "dropping invalid message");
                self.engine
                    .emit(Event::log(LogLevel::Error, format!("invalid message: {e}")));
            }
        }
    }

    /// Dispatches an already-decoded command.
    pub async fn dispatch(&self, command: Command) {
        self.engine.handle_command(command).await;
    }

    /// Runs the inbound loop until the channel closes.
    pub async fn run(&self, mut inbound: mpsc::Receiver<String>) {
        while let Some(raw) = inbound.recv().await {
            self.dispatch_raw(&raw).await;
        }
    }
}
