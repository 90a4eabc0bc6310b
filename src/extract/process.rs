// src/extract/process.rs

//! Bounded external process execution
//!
//! Every child process the extraction chain spawns goes through
//! `ProcessExecutor`, which enforces a wall-clock timeout and kills the
//! child on expiry. stdin is nullified to prevent hangs on tools that
//! prompt.

use crate::error::{Error, Result};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Default timeout for extraction tools (120 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Captured result of a bounded child process
#[derive(Debug)]
pub struct ExecOutput {
    /// Process exit code; -1 when the process was killed on timeout or
    /// terminated by a signal
    pub exit_code: i32,
    pub stdout: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct ProcessExecutor {
    timeout: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a program to completion or timeout.
    ///
    /// Returns `Err(Io)` when the program cannot be spawned at all (for
    /// example, not installed); callers use that to fall through to the
    /// next strategy.
    pub fn run(&self, program: &str, args: &[&str]) -> Result<ExecOutput> {
        debug!("running {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(Error::Io)?;

        match child.wait_timeout(self.timeout)? {
            Some(status) => {
                let output = child.wait_with_output()?;
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !status.success() && !stderr.is_empty() {
                    for line in stderr.lines() {
                        warn!("[{}] {}", program, line);
                    }
                }
                Ok(ExecOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout,
                })
            }
            None => {
                let _ = child.kill();
                let _ = child.wait();
                warn!(
                    "{} timed out after {} seconds, killed",
                    program,
                    self.timeout.as_secs()
                );
                Ok(ExecOutput {
                    exit_code: -1,
                    stdout: String::new(),
                })
            }
        }
    }
}
