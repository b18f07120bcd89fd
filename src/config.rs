/*!
 * Configuration types for orbit-bucket
 */

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::encoding::TextEncoding;
use crate::provider::DEFAULT_PROVIDER_CAP;

/// Errors loading, saving or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to set up logging: {0}")]
    Logging(String),
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bulk transfer tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Worker threads per parallel bulk call (0 = one per available core)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Keys requested per listing call, clamped to the provider's cap
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Keys per batch-delete call, clamped to the provider's cap
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,

    /// Stop handing queued items to workers after the first failure
    #[serde(default)]
    pub abort_pending_on_failure: bool,

    /// Encoding used when `read_text`/`write_text` are not given one
    #[serde(default)]
    pub default_encoding: TextEncoding,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            page_size: default_page_size(),
            delete_batch_size: default_delete_batch_size(),
            abort_pending_on_failure: false,
            default_encoding: TextEncoding::default(),
        }
    }
}

impl TransferConfig {
    /// Worker count with auto-detection resolved
    pub fn effective_workers(&self) -> usize {
        if self.max_workers == 0 {
            get_cpu_count()
        } else {
            self.max_workers
        }
    }
}

/// Diagnostic output settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Emit JSON lines instead of compact text
    #[serde(default)]
    pub json: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_max_workers() -> usize {
    5
}

fn default_page_size() -> usize {
    DEFAULT_PROVIDER_CAP
}

fn default_delete_batch_size() -> usize {
    DEFAULT_PROVIDER_CAP
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.page_size == 0 {
            return Err(ConfigError::Invalid(
                "transfer.page_size must be at least 1".to_string(),
            ));
        }
        if self.transfer.delete_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "transfer.delete_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get the number of available CPU cores
fn get_cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
