//! tracing subscriber setup for the goalforge binary.

use anyhow::{anyhow, Result};
use std::io;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "GOALFORGE_LOG";

/// Build the filter: `GOALFORGE_LOG`, then `RUST_LOG`, then `default_level`.
pub fn build_filter(default_level: &str) -> Result<EnvFilter> {
    let directives = std::env::var(LOG_ENV)
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_level.to_string());
    EnvFilter::try_new(&directives)
        .map_err(|e| anyhow!("Invalid log filter {:?}: {}", directives, e))
}

/// Install the global subscriber. Logs go to stderr so stdout stays free for run summaries.
pub fn init(default_level: &str, json: bool) -> Result<()> {
    let filter = build_filter(default_level)?;

    let layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
