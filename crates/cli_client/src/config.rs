//! Config file loading
//!
//! Location: `$CONFIG_DIR/serialterm/config.toml` unless `--config` is given.
//! Every key is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serialterm_core::OpenOptions;
use std::path::{Path, PathBuf};

/// Terminal behaviour toggles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    /// Write typed bytes to the screen as well as the device
    pub echo: bool,
    /// Hold keystrokes until Enter, then send the line in one write
    pub flush_on_enter: bool,
    /// Render inbound `\n` as `\r\n`
    pub convert_eol: bool,
    /// Connect to ports as they are plugged in
    pub autoconnect: bool,
    /// Send `\n` right after connecting
    pub wake_on_connect: bool,
    /// Block addressed by `sense` commands
    pub sense_block: u32,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            echo: false,
            flush_on_enter: false,
            convert_eol: true,
            autoconnect: false,
            wake_on_connect: true,
            sense_block: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub line: OpenOptions,
    pub terminal: TerminalSettings,
    pub logging: LoggingSettings,
}

impl Config {
    /// Default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("serialterm").join("config.toml"))
    }

    /// Load from `path`, which must exist, or from the default location if
    /// there is a file there. Falls back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config
            .line
            .validate()
            .with_context(|| format!("Invalid [line] section in {}", path.display()))?;
        Ok(config)
    }
}
