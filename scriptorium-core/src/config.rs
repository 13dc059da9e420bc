//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/scriptorium/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/scriptorium/` (~/.config/scriptorium/)
//! - Data: `$XDG_DATA_HOME/scriptorium/` (~/.local/share/scriptorium/)
//! - State/Logs: `$XDG_STATE_HOME/scriptorium/` (~/.local/state/scriptorium/)
//!
//! The data directory holds one subdirectory per analysis plus the
//! `analyses-config.json` registry document; `engine.data_dir` overrides it
//! for deployments that keep analyses elsewhere.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine configuration
#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    /// Override for the analyses data directory
    pub data_dir: Option<PathBuf>,

    /// Entries kept in each analysis's in-memory log ring
    #[serde(default = "default_memory_log_capacity")]
    pub memory_log_capacity: usize,

    /// Default page size for log retrieval
    #[serde(default = "default_log_page_size")]
    pub log_page_size: usize,

    /// Base64-encoded 32-byte key for environment encryption.
    /// When absent, a key is generated into `secret.key` next to the config
    /// file on first use.
    pub env_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            memory_log_capacity: default_memory_log_capacity(),
            log_page_size: default_log_page_size(),
            env_key: None,
        }
    }
}

fn default_memory_log_capacity() -> usize {
    500
}

fn default_log_page_size() -> usize {
    100
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/scriptorium/config.toml` (~/.config/scriptorium/config.toml)
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Returns the config directory path
    pub fn config_dir() -> PathBuf {
        xdg_config_home().join("scriptorium")
    }

    /// Returns the state directory path (for the engine's own logs)
    ///
    /// `$XDG_STATE_HOME/scriptorium/` (~/.local/state/scriptorium/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("scriptorium")
    }

    /// Returns the data directory holding all analyses, honoring the
    /// `engine.data_dir` override.
    pub fn data_dir(&self) -> PathBuf {
        self.engine
            .data_dir
            .clone()
            .unwrap_or_else(|| xdg_data_home().join("scriptorium"))
    }

    /// Returns the directory that holds one subdirectory per analysis
    pub fn analyses_dir(&self) -> PathBuf {
        self.data_dir().join("analyses")
    }

    /// Returns the path of the configuration document describing all analyses
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir().join("analyses-config.json")
    }

    /// Returns the default env-key file path, used when `engine.env_key`
    /// is not configured
    pub fn env_key_path() -> PathBuf {
        Self::config_dir().join("secret.key")
    }

    /// Returns the engine's own log file path
    ///
    /// `$XDG_STATE_HOME/scriptorium/scriptorium.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("scriptorium.log")
    }
}
