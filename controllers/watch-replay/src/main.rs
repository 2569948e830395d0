//! Watch Replay
//!
//! Feeds recorded Kubernetes watch response bodies (newline-delimited JSON,
//! one file per connection) through the kube-watch session engine:
//! - Logs every decoded event as a `DynamicObject`
//! - Carries the resume point from one segment to the next
//! - Applies the reconnect decision and backoff between segments
//!
//! Useful for checking captured watch traffic without a cluster.

mod error;
mod replay;

use crate::error::ReplayError;
use anyhow::Context;
use kube_watch::WatchConfig;
use replay::{Input, Replay};
use std::env;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Watch Replay");

    // Load configuration from environment variables
    let inputs = Input::parse_list(&env::var("WATCH_INPUT").unwrap_or_else(|_| "-".to_string()));
    let name = env::var("WATCH_NAME").unwrap_or_else(|_| "replay".to_string());
    let config = WatchConfig::from_env().map_err(ReplayError::from)?;

    info!("Configuration:");
    info!("  Name: {}", name);
    info!(
        "  Inputs: {}",
        inputs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("  Max frame bytes: {}", config.max_frame_bytes);
    info!(
        "  Backoff: {:?} .. {:?}",
        config.backoff_min, config.backoff_max
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping replay");
            interrupt.cancel();
        }
    });

    let summary = Replay::new(name, config, cancel)
        .run(&inputs)
        .await
        .context("watch replay failed")?;

    info!(
        "Replayed {} segment(s), {} event(s), resume point {}",
        summary.segments,
        summary.events,
        summary.resource_version.as_deref().unwrap_or("<none>")
    );
    Ok(())
}
