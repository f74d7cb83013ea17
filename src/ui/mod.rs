//! Terminal output helpers
//!
//! `cliclack` renders steps and spinners on a terminal; CI and piped output
//! fall back to plain `[OK]`/`[WARN]` lines.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_success, remark, section, step_info, step_ok, step_ok_detail,
    step_warn, step_warn_hint,
};
pub use progress::{DownloadProgress, TaskSpinner};
