//! Hoist worker entry point.
//!
//! Runs the upload engine as a background process speaking a JSON line
//! protocol: commands arrive on stdin, events leave on stdout, logs go to
//! stderr. The host that spawns the worker plays the part of the
//! foreground page: it forwards client commands in and fans events out.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use hoist_control::HttpControlPlane;
use hoist_engine::{LifecycleController, LifecycleEvent, MessageBus, UploadEngine, WorkerConfig};
use hoist_store::UploadStore;

fn main() -> anyhow::Result<()> {
    // stdout carries the event stream; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting hoist worker");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("hoist.toml"));
    let config = WorkerConfig::load(&config_path)?;
    tracing::info!(api = %config.api_base_url, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("worker shut down cleanly");
    Ok(())
}

async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let data_dir = std::env::var("HOIST_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    std::fs::create_dir_all(&data_dir)?;

    let store = Arc::new(UploadStore::new(&data_dir));
    let api = Arc::new(HttpControlPlane::new(
        config.api_base_url.clone(),
        config.api_timeout(),
        config.retry.policy(),
    )?);

    let engine = UploadEngine::new(config, store, api);
    let bus = MessageBus::new(Arc::clone(&engine));
    let lifecycle = LifecycleController::new(Arc::clone(&engine));

    lifecycle.handle(LifecycleEvent::Install).await;
    lifecycle.handle(LifecycleEvent::Activate).await;

    // Outbound: broadcast events to stdout, one JSON object per line.
    let mut events = bus.subscribe();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(mut line) => {
                        line.push('\n');
                        if stdout.write_all(line.as_bytes()).await.is_err() {
                            break;
                        }
                        let _ = stdout.flush().await;
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to encode event"),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Inbound: stdin lines to the bus.
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(64);
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            if inbound_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = bus.run(inbound_rx) => {
            tracing::info!("input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
        }
    }

    reader.abort();
    writer.abort();
    Ok(())
}
