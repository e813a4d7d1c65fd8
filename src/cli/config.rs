use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

use nfc_player::PlayerSettings;

/// Settings file. Missing sections or keys take their defaults, so a file
/// only needs the values it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tag registry configuration
    pub registry: RegistryConfig,

    /// NFC reader configuration
    pub reader: ReaderConfig,

    /// External media player
    pub player: PlayerSettings,

    /// Media library configuration
    pub library: LibraryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Path to the SQLite registry file
    pub path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            path: nfc_player::DEFAULT_DB_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Reader address (usb, usb:<name>, stdin, tty:<path>)
    pub location: String,

    /// Longest wait on the reader before checking for shutdown (in milliseconds)
    pub poll_interval_ms: u64,

    /// Pause after a failed read (in milliseconds)
    pub error_pause_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            location: nfc_player::reader::DEFAULT_LOCATION.to_string(),
            poll_interval_ms: 500,
            error_pause_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Folder offered when registering a tag
    pub default_directory: Option<String>,

    /// Whether playlists include files from subfolders
    pub recursive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,

    /// Whether to include timestamps in logs
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            timestamps: true,
        }
    }
}

impl Config {
    /// Read `config_path`, writing a default file there first when it does
    /// not exist. Without a path the built-in defaults are used.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(path) => path,
            None => return Ok(Config::default()),
        };

        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            info!("Wrote default configuration to {}", path.display());
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, content).context("Failed to write configuration file")
    }
}
