//! Configuration loading for keelsync.
//!
//! Configuration is loaded from a TOML file (e.g. `keelsync.toml`). Every
//! section and field is optional.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Action queue options.
    #[serde(default)]
    pub queue: QueueOptions,
    /// Transform log options.
    #[serde(default)]
    pub log: LogOptions,
    /// Storage options.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Action queue options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueOptions {
    /// Start processing as soon as actions are queued (default: true).
    #[serde(default = "default_auto_process")]
    pub auto_process: bool,
    /// Bucket key holding the queue (default: "queue").
    #[serde(default = "default_queue_name")]
    pub name: String,
}

/// Transform log options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogOptions {
    /// Bucket key holding the log (default: "log").
    #[serde(default = "default_log_name")]
    pub name: String,
}

/// Storage options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite bucket file (default: keelsync.db).
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

// Default value functions
fn default_auto_process() -> bool {
    true
}

fn default_queue_name() -> String {
    "queue".to_string()
}

fn default_log_name() -> String {
    "log".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("keelsync.db")
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            auto_process: default_auto_process(),
            name: default_queue_name(),
        }
    }
}

impl QueueOptions {
    /// Set the bucket key.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Enable or disable automatic processing.
    pub fn with_auto_process(mut self, auto_process: bool) -> Self {
        self.auto_process = auto_process;
        self
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            name: default_log_name(),
        }
    }
}

impl LogOptions {
    /// Set the bucket key.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
