//! Configuration management for keg

pub mod schema;

pub use schema::Config;

use crate::error::{KegError, KegResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keg")
            .join("config.toml")
    }

    /// Get the default state directory path
    pub fn default_state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keg")
    }

    /// Resolve the state directory: CLI/env override, then config, then default
    pub fn state_dir(config: &Config, cli_override: Option<&Path>) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| config.general.state_dir.clone())
            .unwrap_or_else(Self::default_state_dir)
    }

    /// Directory holding the compressed catalog and its metadata
    pub fn catalog_dir(state_dir: &Path) -> PathBuf {
        state_dir.join("catalog")
    }

    /// Package state cache file
    pub fn package_cache_path(state_dir: &Path) -> PathBuf {
        state_dir.join("unified_cache.json")
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> KegResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&self.config_path).await.map_err(|e| {
            KegError::io(
                format!("reading config from {}", self.config_path.display()),
                e,
            )
        })?;

        toml::from_str(&content).map_err(|e| KegError::ConfigInvalid {
            path: self.config_path.clone(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> KegResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KegError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            KegError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the state and catalog directories exist
    pub async fn ensure_state_dirs(state_dir: &Path) -> KegResult<()> {
        for dir in [state_dir.to_path_buf(), Self::catalog_dir(state_dir)] {
            fs::create_dir_all(&dir).await.map_err(|e| {
                KegError::io(format!("creating directory {}", dir.display()), e)
            })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
