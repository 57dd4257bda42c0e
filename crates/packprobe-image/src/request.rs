//! Immutable build requests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use packprobe_common::constants::{EMBEDDED_ENV_PREFIX, IMAGE_LABELS_ENV};
use packprobe_common::error::{PackprobeError, Result};
use packprobe_common::types::PullPolicy;

/// Everything the build engine needs to turn a source tree into an image.
///
/// Constructed through [`BuildRequestBuilder`]; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    source: PathBuf,
    buildpacks: Vec<String>,
    env: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    pull_policy: PullPolicy,
    no_color: bool,
}

impl BuildRequest {
    /// Starts a request for the source tree at `source`.
    #[must_use]
    pub fn builder(source: impl Into<PathBuf>) -> BuildRequestBuilder {
        BuildRequestBuilder::new(source)
    }

    /// Source directory to build.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Buildpack coordinates in declaration order.
    #[must_use]
    pub fn buildpacks(&self) -> &[String] {
        &self.buildpacks
    }

    /// Build-time environment variables as declared.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Labels to apply to the final image.
    #[must_use]
    pub const fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Pull policy for builder and run images.
    #[must_use]
    pub const fn pull_policy(&self) -> PullPolicy {
        self.pull_policy
    }

    /// Whether ANSI color is disabled in engine output.
    #[must_use]
    pub const fn no_color(&self) -> bool {
        self.no_color
    }

    /// Returns the environment passed to the engine.
    ///
    /// Labels are carried by the image-labels buildpack through
    /// `BP_IMAGE_LABELS`; they are appended to any value declared
    /// explicitly for that variable.
    #[must_use]
    pub fn engine_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if !self.labels.is_empty() {
            let encoded = encode_labels(&self.labels);
            let merged = match env.get(IMAGE_LABELS_ENV) {
                Some(existing) if !existing.trim().is_empty() => format!("{existing} {encoded}"),
                _ => encoded,
            };
            let _ = env.insert(IMAGE_LABELS_ENV.to_string(), merged);
        }
        env
    }
}

/// Fluent builder for [`BuildRequest`].
#[derive(Debug)]
pub struct BuildRequestBuilder {
    source: PathBuf,
    buildpacks: Vec<String>,
    env: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    pull_policy: PullPolicy,
    no_color: bool,
}

impl BuildRequestBuilder {
    /// Creates a builder with the `never` pull policy and color disabled.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            buildpacks: Vec::new(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            pull_policy: PullPolicy::Never,
            no_color: true,
        }
    }

    /// Appends a buildpack coordinate.
    #[must_use]
    pub fn buildpack(mut self, coordinate: impl Into<String>) -> Self {
        self.buildpacks.push(coordinate.into());
        self
    }

    /// Appends several buildpack coordinates, preserving their order.
    #[must_use]
    pub fn buildpacks<I, S>(mut self, coordinates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.buildpacks.extend(coordinates.into_iter().map(Into::into));
        self
    }

    /// Sets a build-time environment variable; later values win.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.env.insert(key.into(), value.into());
        self
    }

    /// Embeds `key=value` in the image's launch environment through the
    /// environment-variables buildpack (`BPE_<key>`).
    #[must_use]
    pub fn embedded_env(self, key: &str, value: impl Into<String>) -> Self {
        self.env(format!("{EMBEDDED_ENV_PREFIX}{key}"), value)
    }

    /// Sets a label on the final image; later values win.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets the pull policy.
    #[must_use]
    pub const fn pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    /// Toggles ANSI color in engine output.
    #[must_use]
    pub const fn no_color(mut self, no_color: bool) -> Self {
        self.no_color = no_color;
        self
    }

    /// Validates and freezes the request.
    ///
    /// Values are passed through verbatim; only keys are checked.
    ///
    /// # Errors
    ///
    /// Returns `Config` if an environment or label key is empty or a
    /// buildpack coordinate is blank.
    pub fn build(self) -> Result<BuildRequest> {
        if let Some(bad) = self.buildpacks.iter().find(|b| b.trim().is_empty()) {
            return Err(PackprobeError::Config {
                message: format!("buildpack coordinate must not be blank: {bad:?}"),
            });
        }
        check_keys("environment variable", self.env.keys())?;
        check_keys("label", self.labels.keys())?;

        Ok(BuildRequest {
            source: self.source,
            buildpacks: self.buildpacks,
            env: self.env,
            labels: self.labels,
            pull_policy: self.pull_policy,
            no_color: self.no_color,
        })
    }
}

fn check_keys<'a>(kind: &str, keys: impl Iterator<Item = &'a String>) -> Result<()> {
    for key in keys {
        if key.is_empty() {
            return Err(PackprobeError::Config {
                message: format!("{kind} key must not be empty"),
            });
        }
    }
    Ok(())
}

/// Encodes labels as space-separated `key=value` pairs, quoting values that
/// contain whitespace or quotes.
#[must_use]
pub fn encode_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| {
            if v.is_empty() || v.chars().any(|c| c.is_whitespace() || c == '"') {
                format!("{k}=\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))
            } else {
                format!("{k}={v}")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
