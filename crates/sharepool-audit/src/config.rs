//! Configuration file management.
//!
//! Loaded from `$SHAREPOOL_DATA_DIR/config.toml`, falling back to defaults
//! when the file does not exist. Every field has a serde default, so a
//! partial file is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sharepool_types::PoolKey;

/// Complete audit configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// What to audit.
    #[serde(default)]
    pub audit: AuditSection,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Ledger database path. Empty = $data_dir/ledger.db.
    #[serde(default)]
    pub path: String,
}

/// Audit scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSection {
    /// Pools to audit as `client:pool_id`. Empty = every pool.
    #[serde(default)]
    pub pools: Vec<String>,
    /// Exit non-zero when any invariant is violated.
    #[serde(default = "default_true")]
    pub fail_on_violation: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            pools: Vec::new(),
            fail_on_violation: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl AuditConfig {
    /// Load configuration from the default config file location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::data_dir().join("config.toml"))
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        if self.database.path.is_empty() {
            Self::data_dir().join("ledger.db")
        } else {
            PathBuf::from(&self.database.path)
        }
    }

    /// Parsed pool filter. Empty means every pool.
    pub fn pool_filter(&self) -> anyhow::Result<Vec<PoolKey>> {
        self.audit
            .pools
            .iter()
            .map(|raw| {
                raw.parse::<PoolKey>()
                    .map_err(|e| anyhow::anyhow!("invalid pool {raw:?}: {e}"))
            })
            .collect()
    }

    /// Data directory: `$SHAREPOOL_DATA_DIR`, else `$HOME/.sharepool`.
    pub fn data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("SHAREPOOL_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".sharepool"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/sharepool"))
    }
}
