//! Blocking invocation of external tools.
//!
//! The build engine and the container runtime are driven through their
//! CLIs. Each call blocks until the child exits and yields its captured
//! output; interpreting a non-zero exit is left to the caller, which knows
//! which error kind it maps to.

use std::ffi::OsStr;
use std::process::Command;

use crate::error::{PackprobeError, Result};

/// Captured result of an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code returned by the command (`-1` if killed by a signal).
    pub exit_code: i32,
}

impl CommandOutput {
    /// Returns `true` if the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns stdout followed by stderr.
    #[must_use]
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        let mut out = self.stdout.clone();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&self.stderr);
        out
    }

    /// Returns stderr if non-empty, otherwise stdout, trimmed.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let text = text.trim();
        if text.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            text.to_string()
        }
    }
}

/// Runs `program` with `args` and waits for it to exit.
///
/// # Errors
///
/// Returns `Io` if the program cannot be spawned. A non-zero exit is not an
/// error at this level.
pub fn run<I, S>(program: &str, args: I) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    let _ = cmd.args(args);
    tracing::debug!(command = ?cmd, "running external command");

    let output = cmd.output().map_err(|e| PackprobeError::Io {
        path: program.into(),
        source: e,
    })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}
