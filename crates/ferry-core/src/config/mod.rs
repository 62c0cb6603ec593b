//! Configuration management for Ferry.
//!
//! This module handles loading, saving, and validating Ferry configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/ferry/config.toml` |
//! | macOS | `~/Library/Application Support/Ferry/config.toml` |
//! | Windows | `%APPDATA%\Ferry\config.toml` |

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionSettings;
use crate::error::{Error, Result};
use crate::protocol::MAX_CHUNK_SIZE;

/// Main configuration struct for Ferry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network settings
    pub network: NetworkConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listening port (TCP)
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_TRANSFER_PORT,
        }
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Directory received files are saved into
    pub output_dir: PathBuf,
    /// Upload chunk size in bytes
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(crate::DEFAULT_OUTPUT_DIR),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Path of the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "Ferry")
            .ok_or_else(|| Error::Config("could not determine config directory".to_string()))?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load the configuration, falling back to defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk size is zero or would not fit in one
    /// wire frame.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidConfig {
                key: "transfer.chunk_size".to_string(),
                reason: format!("must be between 1 and {MAX_CHUNK_SIZE} bytes"),
            });
        }
        Ok(())
    }

    /// The per-connection slice of this configuration.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            output_dir: self.transfer.output_dir.clone(),
            chunk_size: self.transfer.chunk_size,
        }
    }
}
