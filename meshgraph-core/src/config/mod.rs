//! Configuration management for meshgraph
//!
//! File-based (TOML) configuration with defaults and validation. Every
//! section has sensible defaults so a node can start with an empty file.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Top-level node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity and storage location
    pub node: NodeSection,

    /// Listen address, static peers and reconnect policy
    pub network: NetworkConfig,

    /// Backing storage for the node store
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Node identity section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Origin identifier used as the LWW tie-breaker. Must be unique per
    /// replica; generated if left empty.
    pub id: String,

    /// Base directory for durable storage
    pub data_dir: PathBuf,
}

impl Default for NodeSection {
    fn default() -> Self {
        NodeSection {
            id: String::new(),
            data_dir: PathBuf::from("./meshgraph-data"),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to accept inbound peer connections on; `None` disables
    /// listening (dial-only node)
    pub listen_addr: Option<SocketAddr>,

    /// Static peers to dial on startup
    pub peers: Vec<SocketAddr>,

    /// Timeout for a single dial attempt
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Reconnect backoff policy
    pub backoff: BackoffConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            listen_addr: None,
            peers: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff parameters for peer reconnection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial: Duration,

    /// Multiplier applied after each failed attempt
    pub multiplier: f64,

    /// Upper bound on the retry delay
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial: Duration::from_millis(500),
            multiplier: 2.0,
            max: Duration::from_secs(60),
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Volatile in-memory store
    Memory,
    /// Append-only log under `node.data_dir`
    Disk,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which backend to use
    pub backend: StoreBackend,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig { backend: StoreBackend::Memory }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON lines
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: "info".to_string(), json_format: false, with_target: true }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(format!("{}: {}", path.display(), e)))?;
        let mut config: NodeConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.fill_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Fill values that cannot have static defaults
    pub fn fill_defaults(&mut self) {
        if self.node.id.is_empty() {
            self.node.id = uuid::Uuid::new_v4().to_string();
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.id.is_empty() {
            return Err(ConfigError::InvalidValue("node.id must not be empty".to_string()));
        }
        if self.network.backoff.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(
                "network.backoff.multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.network.backoff.initial > self.network.backoff.max {
            return Err(ConfigError::InvalidValue(
                "network.backoff.initial must not exceed network.backoff.max".to_string(),
            ));
        }
        if crate::logging::LogLevel::from_str(&self.logging.level).is_none() {
            return Err(ConfigError::InvalidValue(format!(
                "logging.level '{}' is not a valid level",
                self.logging.level
            )));
        }
        Ok(())
    }
}
