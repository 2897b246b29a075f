//! Configuration for the anchoring engine

use crate::gateway::GatewayKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Anchoring engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Transaction store
    pub store: StoreConfig,

    /// Ledger gateway
    pub gateway: GatewayConfig,

    /// Upload orchestration
    pub anchoring: AnchoringConfig,

    /// Amount encryption
    pub encryption: EncryptionConfig,

    /// Logging
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "anchor-node".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
            anchoring: AnchoringConfig::default(),
            encryption: EncryptionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database URL (`sqlite://path?mode=rwc` or `sqlite::memory:`)
    pub url: String,

    /// Pool size
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/anchor.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

/// Ledger gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Backend style
    pub kind: GatewayKind,

    /// JSON-RPC URL of the ledger gateway
    pub url: String,

    /// Contract address or chaincode name
    pub ledger_endpoint: String,

    /// Channel (chaincode backends)
    pub channel: String,

    /// HTTP request timeout (milliseconds)
    pub request_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: GatewayKind::Memory,
            url: "http://127.0.0.1:8545".to_string(),
            ledger_endpoint: "reconciliation".to_string(),
            channel: "mychannel".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Upload orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchoringConfig {
    /// Upper bound on one ledger call (milliseconds)
    pub call_timeout_ms: u64,

    /// Concurrent uploads within a batch (1 = sequential)
    pub batch_concurrency: usize,
}

impl AnchoringConfig {
    /// Ledger call timeout
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for AnchoringConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            batch_concurrency: 1,
        }
    }
}

/// Amount encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Environment variable holding the 64-hex-char key
    pub key_env: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_env: "ANCHOR_ENCRYPTION_KEY".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
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

    /// Apply `ANCHOR_*` overrides from a variable lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup("ANCHOR_DATABASE_URL") {
            self.store.url = url;
        }

        if let Some(kind) = lookup("ANCHOR_GATEWAY_KIND") {
            self.gateway.kind = kind.parse()?;
        }

        if let Some(url) = lookup("ANCHOR_GATEWAY_URL") {
            self.gateway.url = url;
        }

        if let Some(endpoint) = lookup("ANCHOR_LEDGER_ENDPOINT") {
            self.gateway.ledger_endpoint = endpoint;
        }

        if let Some(ms) = lookup("ANCHOR_CALL_TIMEOUT_MS") {
            self.anchoring.call_timeout_ms = parse_number("ANCHOR_CALL_TIMEOUT_MS", &ms)?;
        }

        if let Some(n) = lookup("ANCHOR_BATCH_CONCURRENCY") {
            self.anchoring.batch_concurrency = parse_number("ANCHOR_BATCH_CONCURRENCY", &n)?;
        }

        if let Some(level) = lookup("ANCHOR_LOG_LEVEL") {
            self.log.level = level;
        }

        if let Some(json) = lookup("ANCHOR_LOG_JSON") {
            self.log.json = matches!(json.as_str(), "1" | "true" | "TRUE" | "yes");
        }

        Ok(self)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.store.url.trim().is_empty() {
            return Err(Error::Config("store.url must not be empty".to_string()));
        }
        if self.store.max_connections == 0 {
            return Err(Error::Config("store.max_connections must be at least 1".to_string()));
        }
        if self.anchoring.call_timeout_ms == 0 {
            return Err(Error::Config("anchoring.call_timeout_ms must be positive".to_string()));
        }
        if self.anchoring.batch_concurrency == 0 {
            return Err(Error::Config(
                "anchoring.batch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.gateway.kind != GatewayKind::Memory && self.gateway.url.trim().is_empty() {
            return Err(Error::Config("gateway.url is required for remote ledgers".to_string()));
        }
        if self.encryption.key_env.trim().is_empty() {
            return Err(Error::Config("encryption.key_env must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} is not a valid number: {}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "anchor-node");
        assert_eq!(config.gateway.kind, GatewayKind::Memory);
        assert_eq!(config.anchoring.batch_concurrency, 1);
        assert_eq!(config.encryption.key_env, "ANCHOR_ENCRYPTION_KEY");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            kind = "contract"
            url = "http://ledger:8545"

            [anchoring]
            batch_concurrency = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.kind, GatewayKind::Contract);
        assert_eq!(config.anchoring.batch_concurrency, 4);
        assert_eq!(config.anchoring.call_timeout_ms, 30_000);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anchor.toml");
        std::fs::write(&path, "service_name = \"branch-7\"\n[log]\njson = true\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.service_name, "branch-7");
        assert!(config.log.json);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ANCHOR_GATEWAY_KIND", "chaincode"),
            ("ANCHOR_CALL_TIMEOUT_MS", "500"),
            ("ANCHOR_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();

        let config = Config::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.gateway.kind, GatewayKind::Chaincode);
        assert_eq!(config.anchoring.call_timeout(), Duration::from_millis(500));
        assert!(config.log.json);
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let result = Config::default().with_overrides(|k| {
            (k == "ANCHOR_BATCH_CONCURRENCY").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));

        let result = Config::default()
            .with_overrides(|k| (k == "ANCHOR_GATEWAY_KIND").then(|| "ipfs".to_string()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.anchoring.batch_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
