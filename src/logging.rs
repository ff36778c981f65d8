use anyhow::{Result, anyhow};
use tracing::Level;

/// Installs the global fmt subscriber. Fails if one is already installed.
pub fn init_tracing(level: Level) -> Result<()> {
  tracing_subscriber::fmt()
    .with_max_level(level)
    .with_target(true)
    .try_init()
    .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
