//! Configuration file management
//!
//! Loads the TOML user configuration and resolves the per-user configuration
//! directory where the state file also lives.
//! Default config path: ~/.config/ptypane/config.toml

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::view::cell::OutputMode;

/// Application settings: build information plus the loaded user config
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
    pub debug: bool,
    /// Directory holding config.toml and state.json
    pub config_dir: PathBuf,
    pub user_config: UserConfig,
}

impl AppConfig {
    /// Resolve the config directory, load the user config and assemble the
    /// application settings
    pub fn new(name: &str, version: &str, debug: bool) -> Result<Self> {
        let config_dir = find_or_create_config_dir(name)?;
        let user_config = UserConfig::load(&config_dir);
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            debug,
            config_dir,
            user_config,
        })
    }
}

/// User-editable settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserConfig {
    /// Terminal hosting settings
    pub terminal: TerminalConfig,
    /// Buffer editor settings
    pub buffer: BufferConfig,
}

/// Terminal hosting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// TERM environment variable for the child
    pub term_env: String,
    /// Color depth: "normal", "256" or "truecolor"
    pub colors: String,
    /// Columns used when the host cannot be queried
    pub cols: u16,
    /// Rows used when the host cannot be queried
    pub rows: u16,
    /// Drop '\r' from child output (some REPLs emit bare carriage returns)
    pub ignore_carriage_returns: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            term_env: "xterm-256color".to_string(),
            colors: "256".to_string(),
            cols: 80,
            rows: 24,
            ignore_carriage_returns: false,
        }
    }
}

impl TerminalConfig {
    /// Map the configured color depth onto the interpreter's output mode
    pub fn output_mode(&self) -> OutputMode {
        match self.colors.as_str() {
            "normal" | "16" => OutputMode::Normal,
            "truecolor" | "rgb" => OutputMode::TrueColor,
            "256" => OutputMode::Color256,
            other => {
                warn!("unknown colors setting {:?}, using 256", other);
                OutputMode::Color256
            }
        }
    }
}

/// Buffer editor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum submitted lines kept in history
    pub history_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { history_size: 50 }
    }
}

impl UserConfig {
    /// Load config.toml from the config directory, falling back to defaults
    /// when the file is missing or malformed
    pub fn load(config_dir: &Path) -> Self {
        let path = config_dir.join("config.toml");
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_file(&path) {
            Ok(config) => {
                info!("loaded config: {}", path.display());
                config
            }
            Err(e) => {
                warn!("failed to load config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// The default configuration rendered as TOML, for `--config`
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Per-user configuration directory, created on first use
fn find_or_create_config_dir(name: &str) -> Result<PathBuf> {
    let base = dirs::config_dir().context("config directory not found")?;
    let dir = base.join(name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config dir: {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_mode() {
        assert_eq!(TerminalConfig::default().output_mode(), OutputMode::Color256);
    }

    #[test]
    fn test_output_mode_names() {
        let mut config = TerminalConfig::default();
        config.colors = "normal".to_string();
        assert_eq!(config.output_mode(), OutputMode::Normal);
        config.colors = "truecolor".to_string();
        assert_eq!(config.output_mode(), OutputMode::TrueColor);
        config.colors = "bogus".to_string();
        assert_eq!(config.output_mode(), OutputMode::Color256);
    }

    #[test]
    fn test_default_toml_round_trips() {
        let rendered = UserConfig::default_toml();
        let parsed: UserConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.terminal.term_env, "xterm-256color");
        assert_eq!(parsed.buffer.history_size, 50);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let parsed: UserConfig = toml::from_str("[terminal]\ncols = 120\n").unwrap();
        assert_eq!(parsed.terminal.cols, 120);
        assert_eq!(parsed.terminal.rows, 24);
        assert_eq!(parsed.buffer.history_size, 50);
    }
}
