//! Configuration schema for keg
//!
//! Configuration is stored at `~/.config/keg/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Formula catalog mirror settings
    pub catalog: CatalogConfig,

    /// Package state cache settings
    pub packages: PackagesConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Override for the state directory
    pub state_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            state_dir: None,
        }
    }
}

/// Catalog mirror configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Upstream formula index URL
    pub url: String,

    /// Minimum hours between upstream checks
    pub refresh_interval_hours: u64,

    /// Maximum accepted download size in MB
    pub max_download_mb: u64,

    /// Absolute deadline for one request, body included
    pub request_deadline_secs: u64,

    /// TCP/TLS connect timeout
    pub connect_timeout_secs: u64,

    /// Time allowed for the response headers to arrive
    pub response_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: "https://formulae.brew.sh/api/formula.json".to_string(),
            refresh_interval_hours: 24,
            max_download_mb: 40,
            request_deadline_secs: 300,
            connect_timeout_secs: 5,
            response_timeout_secs: 30,
        }
    }
}

impl CatalogConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_hours * 3600)
    }

    pub fn max_download_bytes(&self) -> u64 {
        self.max_download_mb * 1024 * 1024
    }
}

/// Package state cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagesConfig {
    /// Package manager executable
    pub manager: String,

    /// Seconds before the cached package state is considered stale
    pub ttl_secs: u64,

    /// Maximum package names per version query
    pub batch_size: usize,

    /// Timeout for a single package manager invocation
    pub command_timeout_secs: u64,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            manager: "brew".to_string(),
            ttl_secs: 3600,
            batch_size: 50,
            command_timeout_secs: 120,
        }
    }
}
