//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/datum/config.toml)
//! 3. Environment variables (DATUM_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::identity::DEFAULT_DELIMITER;
use crate::quick_id::OnAmbiguous;

/// Environment variable prefix
const ENV_PREFIX: &str = "DATUM";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the document database and the last-touched file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Delimiter joining id template parts
    #[serde(default = "default_delimiter")]
    pub id_delimiter: String,

    /// Default policy for ambiguous QuickIds
    #[serde(default)]
    pub on_ambiguous: OnAmbiguous,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            id_delimiter: default_delimiter(),
            on_ambiguous: OnAmbiguous::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (DATUM_DATA_DIR, DATUM_ID_DELIMITER, DATUM_ON_AMBIGUOUS)
    /// 2. Config file (~/.config/datum/config.toml or DATUM_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // DATUM_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // DATUM_ID_DELIMITER
        if let Ok(val) = std::env::var(format!("{}_ID_DELIMITER", ENV_PREFIX)) {
            self.id_delimiter = val;
        }

        // DATUM_ON_AMBIGUOUS
        if let Ok(val) = std::env::var(format!("{}_ON_AMBIGUOUS", ENV_PREFIX)) {
            match val.parse() {
                Ok(policy) => self.on_ambiguous = policy,
                Err(e) => warn!("Ignoring {}_ON_AMBIGUOUS: {}", ENV_PREFIX, e),
            }
        }
    }

    /// Set a field by its config-file key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "id_delimiter" => self.id_delimiter = value.to_string(),
            "on_ambiguous" => {
                self.on_ambiguous = value
                    .parse()
                    .with_context(|| format!("Invalid value for on_ambiguous: {}", value))?
            }
            other => anyhow::bail!(
                "Unknown config key '{}' (expected data_dir, id_delimiter or on_ambiguous)",
                other
            ),
        }
        Ok(())
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with DATUM_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("datum")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("datum.db")
    }

    /// Get the path to the last-touched ids file
    pub fn last_touched_path(&self) -> PathBuf {
        self.data_dir.join("last_touched.json")
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("datum")
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}
