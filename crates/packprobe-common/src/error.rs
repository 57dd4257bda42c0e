//! Unified error types for the packprobe workspace.
//!
//! The variants mirror the stages of a verification case: fixture setup,
//! build, container start, readiness, probing, assertions, and teardown.
//! Setup and infrastructure variants abort a case; `Assertion` is a verdict
//! rather than a system fault; `Teardown` is reported alongside the verdict
//! without overturning it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{ContainerId, LogTranscript};

/// A single expected-versus-actual mismatch recorded by an assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// What was being checked (e.g. `build log`, `buildpack[6].key`).
    pub subject: String,
    /// Human-readable expectation.
    pub expected: String,
    /// Human-readable observed value.
    pub actual: String,
}

impl Mismatch {
    /// Creates a new mismatch record.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, got {}",
            self.subject, self.expected, self.actual
        )
    }
}

/// Renders a list of mismatches, one per line.
fn render_mismatches(mismatches: &[Mismatch]) -> String {
    mismatches
        .iter()
        .map(|m| format!("  - {m}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum PackprobeError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration or request value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The named fixture does not exist under the fixture root.
    #[error("fixture not found: {name} (looked in {root})")]
    FixtureNotFound {
        /// Fixture name as requested.
        name: String,
        /// Directory that was searched.
        root: PathBuf,
    },

    /// The build engine reported a failure.
    #[error("build of {image} failed: {message}\n{transcript}")]
    Build {
        /// Image name that was being built.
        image: String,
        /// Short description of the failure.
        message: String,
        /// Full build output captured before the failure.
        transcript: LogTranscript,
    },

    /// The container runtime refused to start a container.
    #[error("failed to start container from {image}: {message}")]
    ContainerStart {
        /// Image the container was started from.
        image: String,
        /// Runtime diagnostic output.
        message: String,
    },

    /// A container runtime command other than start failed.
    #[error("container runtime `{operation}` failed: {message}")]
    Runtime {
        /// Runtime operation (e.g. `logs`, `stop`).
        operation: &'static str,
        /// Runtime diagnostic output.
        message: String,
    },

    /// A container never became reachable within the allotted time.
    #[error("container {container} not ready after {waited:?} ({attempts} attempts): {last_error}")]
    ReadinessTimeout {
        /// Container that was being polled.
        container: ContainerId,
        /// Total time spent waiting.
        waited: Duration,
        /// Number of liveness checks performed.
        attempts: u32,
        /// Last observed liveness failure.
        last_error: String,
    },

    /// A probe failed with a transport error after any applicable retry.
    #[error("probe of {url} failed: {message}")]
    Probe {
        /// Target URL.
        url: String,
        /// Transport or TLS failure description.
        message: String,
    },

    /// One or more expectations did not hold.
    #[error("{} assertion(s) failed:\n{}", .0.len(), render_mismatches(.0))]
    Assertion(Vec<Mismatch>),

    /// A cleanup step failed.
    #[error("teardown of {resource} failed: {message}")]
    Teardown {
        /// Resource being released (e.g. `container abc123`).
        resource: String,
        /// Runtime diagnostic output.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl PackprobeError {
    /// Returns `true` if this error is an expectation mismatch rather than an
    /// infrastructure failure.
    #[must_use]
    pub const fn is_assertion(&self) -> bool {
        matches!(self, Self::Assertion(_))
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PackprobeError>;
