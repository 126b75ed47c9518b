//! Tracing subscriber setup for applications embedding the sync layer.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "azulcare_sync=info";

/// Install a fmt subscriber honoring `RUST_LOG`, falling back to [`DEFAULT_FILTER`]
pub fn init_logging() -> Result<()> {
    init_with_filter(DEFAULT_FILTER)
}

/// Fails if a global subscriber is already installed
pub fn init_with_filter(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| anyhow!("invalid log filter {:?}: {}", default_filter, e))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
