//! Harness configuration model.
//!
//! Every blocking wait in a verification case is bounded by one of the
//! timeouts below. Values come from [`HarnessConfig::default`], optionally
//! overridden by `PACKPROBE_*` environment variables and then CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{PackprobeError, Result};

/// Root configuration for a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory containing named fixture trees.
    pub fixture_root: PathBuf,
    /// Build engine executable (name on `PATH` or absolute path).
    pub pack_binary: String,
    /// Container runtime executable (name on `PATH` or absolute path).
    pub docker_binary: String,
    /// Disable ANSI color in build output.
    pub no_color: bool,
    /// Upper bound for a started container to accept connections.
    #[serde(with = "duration_ms")]
    pub readiness_timeout: Duration,
    /// Interval between consecutive poll attempts.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// Upper bound for mutual-TLS probe retries.
    #[serde(with = "duration_ms")]
    pub tls_retry_timeout: Duration,
    /// Upper bound for a container log to contain an expected line.
    #[serde(with = "duration_ms")]
    pub log_timeout: Duration,
    /// Leave the built image and its cache volumes in place after a case.
    pub keep_image: bool,
    /// Leave the container running after a case.
    pub keep_container: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            fixture_root: PathBuf::from(constants::DEFAULT_FIXTURE_ROOT),
            pack_binary: constants::DEFAULT_PACK_BINARY.to_string(),
            docker_binary: constants::DEFAULT_DOCKER_BINARY.to_string(),
            no_color: true,
            readiness_timeout: constants::DEFAULT_READINESS_TIMEOUT,
            poll_interval: constants::DEFAULT_POLL_INTERVAL,
            tls_retry_timeout: constants::DEFAULT_TLS_RETRY_TIMEOUT,
            log_timeout: constants::DEFAULT_LOG_TIMEOUT,
            keep_image: false,
            keep_container: false,
        }
    }
}

impl HarnessConfig {
    /// Builds a configuration from defaults overridden by `PACKPROBE_*`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up by full variable name
    /// (e.g. `PACKPROBE_READINESS_TIMEOUT_MS`).
    ///
    /// # Errors
    ///
    /// Returns an error if a looked-up value cannot be parsed.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{}{name}", constants::ENV_PREFIX));

        if let Some(v) = var("FIXTURE_ROOT") {
            self.fixture_root = PathBuf::from(v);
        }
        if let Some(v) = var("PACK") {
            self.pack_binary = v;
        }
        if let Some(v) = var("DOCKER") {
            self.docker_binary = v;
        }
        if let Some(v) = var("NO_COLOR") {
            self.no_color = parse_bool("NO_COLOR", &v)?;
        }
        if let Some(v) = var("READINESS_TIMEOUT_MS") {
            self.readiness_timeout = parse_millis("READINESS_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("POLL_INTERVAL_MS") {
            self.poll_interval = parse_millis("POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = var("TLS_RETRY_TIMEOUT_MS") {
            self.tls_retry_timeout = parse_millis("TLS_RETRY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("LOG_TIMEOUT_MS") {
            self.log_timeout = parse_millis("LOG_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("KEEP_IMAGE") {
            self.keep_image = parse_bool("KEEP_IMAGE", &v)?;
        }
        if let Some(v) = var("KEEP_CONTAINER") {
            self.keep_container = parse_bool("KEEP_CONTAINER", &v)?;
        }
        Ok(self)
    }
}

fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| PackprobeError::Config {
            message: format!("{}{name}={value:?}: {e}", constants::ENV_PREFIX),
        })
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(PackprobeError::Config {
            message: format!(
                "{}{name}={value:?}: expected a boolean",
                constants::ENV_PREFIX
            ),
        }),
    }
}

/// Serializes a [`Duration`] as an integer number of milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
