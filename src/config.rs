use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::Level;

const DEFAULT_RETENTION_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
  /// How long a finished task stays visible to `get_status` before it is evicted.
  pub retention: Duration,
  pub log_level: Level,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
      log_level: Level::INFO,
    }
  }
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  pub fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let defaults = Self::default();
    let retention = match lookup("TASK_RETENTION_SECS") {
      Some(raw) => Duration::from_secs(
        raw.trim()
          .parse::<u64>()
          .with_context(|| format!("TASK_RETENTION_SECS must be a whole number of seconds, got {:?}", raw))?,
      ),
      None => defaults.retention,
    };
    let log_level = match lookup("LOG_LEVEL") {
      Some(raw) => raw
        .trim()
        .parse::<Level>()
        .map_err(|_| anyhow!("LOG_LEVEL must be one of trace, debug, info, warn, error; got {:?}", raw))?,
      None => defaults.log_level,
    };
    Ok(Self { retention, log_level })
  }
}
