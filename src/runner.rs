//! Package manager command execution
//!
//! The package state cache never spawns processes directly; it goes through
//! [`CommandRunner`] so tests can substitute canned output.

use crate::error::{KegError, KegResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How a command's output is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Collect stdout and return it
    Capture,
    /// Inherit the terminal; nothing is returned
    Stream,
}

/// Abstract command execution interface
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args...`, failing if it exceeds `timeout` or `cancel` fires
    async fn run(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        mode: RunMode,
        program: &str,
        args: &[&str],
    ) -> KegResult<Vec<u8>>;
}

/// Runs commands as real child processes
#[derive(Debug, Default, Clone)]
pub struct ExecRunner;

impl ExecRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ExecRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        mode: RunMode,
        program: &str,
        args: &[&str],
    ) -> KegResult<Vec<u8>> {
        let shown = command_line(program, args);
        debug!("Executing: {}", shown);

        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        match mode {
            RunMode::Capture => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
            RunMode::Stream => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| KegError::command_failed(shown.clone(), e))?;

        // Dropping the output future drops the child, which kills it.
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(KegError::Cancelled),
            res = tokio::time::timeout(timeout, child.wait_with_output()) => match res {
                Ok(out) => out.map_err(|e| KegError::command_failed(shown.clone(), e))?,
                Err(_) => {
                    return Err(KegError::CommandTimeout {
                        command: shown,
                        timeout_secs: timeout.as_secs(),
                    })
                }
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KegError::command_exec(shown, stderr.trim()));
        }

        Ok(match mode {
            RunMode::Capture => output.stdout,
            RunMode::Stream => Vec::new(),
        })
    }
}

pub(crate) fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}
