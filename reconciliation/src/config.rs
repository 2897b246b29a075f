//! Configuration for the reconciliation loop

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconciliation loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delay between polls (default: 5s)
    pub poll_interval_ms: u64,

    /// Maximum unprocessed events handled per poll
    pub batch_size: u32,

    /// Time the node waits for the loop after cancellation
    pub shutdown_grace_ms: u64,

    /// Bound on each ledger call made while polling
    pub call_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            batch_size: 100,
            shutdown_grace_ms: 5_000,
            call_timeout_ms: 30_000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config::default().with_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RECON_*` overrides from a variable lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(ms) = lookup("RECON_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_number("RECON_POLL_INTERVAL_MS", &ms)?;
        }
        if let Some(n) = lookup("RECON_BATCH_SIZE") {
            self.batch_size = parse_number("RECON_BATCH_SIZE", &n)?;
        }
        if let Some(ms) = lookup("RECON_SHUTDOWN_GRACE_MS") {
            self.shutdown_grace_ms = parse_number("RECON_SHUTDOWN_GRACE_MS", &ms)?;
        }
        if let Some(ms) = lookup("RECON_CALL_TIMEOUT_MS") {
            self.call_timeout_ms = parse_number("RECON_CALL_TIMEOUT_MS", &ms)?;
        }
        Ok(self)
    }

    /// Reject configurations the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.call_timeout_ms == 0 {
            return Err(Error::Config("call_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Shutdown grace period as a duration
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Ledger call bound as a duration
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} is not a valid number: {}", name, value)))
}
