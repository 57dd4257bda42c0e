//! Domain primitive types used across the packprobe workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PackprobeError, Result};

/// Identifier of a container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 12 characters, the form `docker ps` shows.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a built image (`sha256:...` digest or a name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    /// Creates a new image ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether the build engine may pull builder and run images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    /// Only use images already present locally.
    #[default]
    Never,
    /// Always pull, even when a local copy exists.
    Always,
    /// Pull only when no local copy exists.
    IfNotPresent,
}

impl PullPolicy {
    /// Returns the value accepted by `pack build --pull-policy`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Always => "always",
            Self::IfNotPresent => "if-not-present",
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PullPolicy {
    type Err = PackprobeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "never" => Ok(Self::Never),
            "always" => Ok(Self::Always),
            "if-not-present" => Ok(Self::IfNotPresent),
            other => Err(PackprobeError::Config {
                message: format!(
                    "unknown pull policy {other:?} (expected never, always, or if-not-present)"
                ),
            }),
        }
    }
}

/// Ordered sequence of output lines captured from a build or a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTranscript {
    lines: Vec<String>,
}

impl LogTranscript {
    /// Creates an empty transcript.
    #[must_use]
    pub const fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Splits raw process output into lines, dropping carriage returns.
    #[must_use]
    pub fn from_output(output: &str) -> Self {
        Self {
            lines: output
                .lines()
                .map(|l| l.trim_end_matches('\r').to_string())
                .collect(),
        }
    }

    /// Appends the lines of another chunk of output.
    pub fn extend_from_output(&mut self, output: &str) {
        self.lines
            .extend(output.lines().map(|l| l.trim_end_matches('\r').to_string()));
    }

    /// Returns the captured lines in order.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Returns `true` if no output was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }

    /// Returns `true` if any single line contains `needle`.
    #[must_use]
    pub fn contains_line(&self, needle: &str) -> bool {
        self.position_of(needle, 0).is_some()
    }

    /// Returns the index of the first line at or after `from` containing `needle`.
    #[must_use]
    pub fn position_of(&self, needle: &str, from: usize) -> Option<usize> {
        self.lines
            .iter()
            .skip(from)
            .position(|l| l.contains(needle))
            .map(|p| p + from)
    }
}

impl fmt::Display for LogTranscript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Generates a unique resource name of the form `packprobe-<uuid>`.
///
/// Image and container names must not collide across cases running in
/// parallel against the same runtime daemon.
#[must_use]
pub fn random_name() -> String {
    format!("{}-{}", crate::constants::APP_NAME, uuid::Uuid::new_v4())
}
