//! Error types for keg
//!
//! All modules use `KegResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for keg operations
pub type KegResult<T> = Result<T, KegError>;

/// All errors that can occur in keg
#[derive(Error, Debug)]
pub enum KegError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    #[error("Command timed out after {timeout_secs}s: {command}")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    // Package state errors
    #[error("Unexpected output from {command}: {reason}")]
    QueryParse { command: String, reason: String },

    // Catalog errors
    #[error("Catalog not found at {0}")]
    CatalogNotFound(PathBuf),

    #[error("Invalid search pattern: {0}")]
    SearchPattern(String),

    #[error("Malformed upstream catalog: {0}")]
    CatalogFormat(String),

    /// `size` is the declared length, or the bytes seen when the body ran past the limit
    #[error("Upstream payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Unexpected upstream status {status}")]
    UpstreamStatus { status: u16 },

    #[error("Catalog recovery failed: upstream returned {status} to an unconditional fetch")]
    DanglingRecovery { status: u16 },

    #[error("Catalog fetch failed: {0}")]
    Fetch(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KegError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Check if error is retryable on a later run
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CommandTimeout { .. } | Self::Fetch(_) => true,
            Self::UpstreamStatus { status } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::CatalogNotFound(_) => Some("Run: keg catalog refresh"),
            Self::SearchPattern(_) => Some("Drop --regex to search for the literal text"),
            Self::PayloadTooLarge { .. } => Some("Raise catalog.max_download_mb in config.toml"),
            Self::CommandFailed { .. } => {
                Some("Is Homebrew installed? See https://brew.sh or set packages.manager")
            }
            Self::UpstreamStatus { status: 429 } => Some("Rate limited upstream, try again later"),
            Self::DanglingRecovery { .. } => Some("Run: keg catalog refresh --force"),
            _ => None,
        }
    }
}
