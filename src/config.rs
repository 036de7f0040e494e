//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\playdeck\config.toml
//! - macOS: ~/Library/Application Support/playdeck/config.toml
//! - Linux: ~/.config/playdeck/config.toml
//!
//! The config file is human-readable and editable. Missing keys fall back to
//! their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resume::STATE_FILE_NAME;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Playback worker settings
    pub playback: PlaybackConfig,

    /// Audio output settings
    pub audio: AudioConfig,
}

/// Playback worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Restore and record per-file positions
    pub remember_position: bool,

    /// Idle poll interval of the worker
    pub poll_interval_ms: u64,

    /// Pause after the priming play on load, and after rewinding a finished file
    pub load_settle_ms: u64,

    /// Seek step for forward/backward
    pub seek_interval_ms: u64,

    /// Seek step for fast forward/backward
    pub fast_seek_interval_ms: u64,

    /// Override for the resume position file
    pub state_file: Option<PathBuf>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            remember_position: true,
            poll_interval_ms: 250,
            load_settle_ms: 50,
            seek_interval_ms: 1000,
            fast_seek_interval_ms: 5000,
            state_file: None,
        }
    }
}

impl PlaybackConfig {
    pub fn poll_interval(&self) -> Duration {
        // A zero timeout would turn the worker into a busy loop
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn load_settle(&self) -> Duration {
        Duration::from_millis(self.load_settle_ms)
    }

    /// Where resume positions live.
    pub fn state_file_path(&self) -> Option<PathBuf> {
        self.state_file
            .clone()
            .or_else(|| config_dir().map(|d| d.join(STATE_FILE_NAME)))
    }
}

/// Audio output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Selected output device name (empty = headphones if present, else system default)
    pub output_device: String,

    /// Initial signal gain in decibels (-20 to +20)
    pub gain_db: f64,

    /// Initial monitor volume (0 - 100)
    pub volume_percent: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: String::new(),
            gain_db: 0.0,
            volume_percent: 100.0,
        }
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("playdeck"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from the default location
///
/// Returns default config if file doesn't exist or can't be parsed.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };
    load_from(&path)
}

/// Load configuration from `path`, falling back to defaults.
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to the default location
pub fn save(config: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)?;
    Ok(path)
}

/// Save configuration to `path`
///
/// Creates the parent directory if it doesn't exist.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
