//! CLI command implementations

pub mod catalog;
pub mod config;
pub mod state;

pub use catalog::execute as catalog;
pub use config::execute as config;
pub use state::execute as state;

use crate::config::Config;
use crate::error::{KegError, KegResult};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Resolved settings shared by the commands
pub struct AppContext {
    pub config: Config,
    pub state_dir: PathBuf,
    /// Fired on Ctrl-C
    pub cancel: CancellationToken,
}

/// Run blocking catalog work off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> KegResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> KegResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| KegError::Internal(format!("blocking task failed: {}", e)))?
}

/// Human-readable byte size
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
