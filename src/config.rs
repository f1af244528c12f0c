//! Configuration for epoch-ledger

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::DatabaseConfig;
use crate::services::ServiceConfig;
use crate::types::VaultId;

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("epoch-ledger")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the sled database and this config
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// sled page cache size in bytes
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity_bytes: u64,

    /// Background flush interval in milliseconds (0 = flush on demand only)
    #[serde(default = "default_flush_every_ms")]
    pub flush_every_ms: u64,

    /// Deadline for each contract or data feed call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Vaults managed by this ledger
    #[serde(default)]
    pub vaults: Vec<VaultId>,

    /// Log level for this crate when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_cache_capacity() -> u64 {
    64 * 1024 * 1024
}

fn default_flush_every_ms() -> u64 {
    500
}

fn default_call_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache_capacity_bytes: default_cache_capacity(),
            flush_every_ms: default_flush_every_ms(),
            call_timeout_secs: default_call_timeout(),
            vaults: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get ledger database path
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ledger.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            path: self.db_path(),
            cache_capacity: self.cache_capacity_bytes,
            flush_every_ms: (self.flush_every_ms > 0).then_some(self.flush_every_ms),
            temporary: false,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            vaults: self.vaults.clone(),
        }
    }
}
