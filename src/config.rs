//! Engine configuration.
//!
//! Stored in TOML at `<config dir>/compendium-search/engine.toml`:
//!
//! ```toml
//! cache_path = "/var/lib/compendium/index-cache.db"
//! default_page_size = 20
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Location of the index cache database. `None` disables persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,

    /// Page size used when the caller does not supply one.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
}

fn default_page_size() -> usize {
    20
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            default_page_size: default_page_size(),
        }
    }
}

impl EngineConfig {
    /// Load from the default location; missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config file path under XDG conventions.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config)
                .join("compendium-search")
                .join("engine.toml"));
        }

        dirs::config_dir()
            .map(|p| p.join("compendium-search").join("engine.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Default cache database path, used when `cache_path` is unset but
    /// persistence is wanted.
    pub fn default_cache_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("compendium-search").join("index-cache.db"))
    }
}
