//! Scenario files: a whole case described as YAML data.
//!
//! ```yaml
//! name: pip
//! fixture: pip
//! build:
//!   buildpacks: [paketo-buildpacks/python]
//!   env: { BPE_SOME_VARIABLE: some-value }
//!   labels: { some-label: some-value }
//! run:
//!   env: { PORT: "8080" }
//!   publish: [8080]
//! expect:
//!   build_log: [Pip Buildpack]
//! probes:
//!   - port: 8080
//!     status: 200
//!     body_contains: Hello, World with pip!
//! ```
//!
//! Host paths (volumes, certificates) are relative to the case's fixture
//! copy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use packprobe_common::error::{PackprobeError, Result};
use packprobe_common::poll::PollPolicy;
use packprobe_common::types::{ImageId, PullPolicy};
use packprobe_image::descriptor::BuildResult;
use packprobe_image::request::BuildRequest;
use packprobe_runtime::readiness::Liveness;
use packprobe_runtime::request::{PortBinding, RunRequest};
use serde::{Deserialize, Serialize};

use crate::assert::Expectations;
use crate::case::{CaseReport, Harness};
use crate::probe::{ProbeOptions, Scheme};

/// A complete case: fixture, build, run, expectations, probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Case label.
    pub name: String,
    /// Fixture directory name under the fixture root.
    pub fixture: String,
    /// Subdirectory of the fixture to build, if not its root.
    #[serde(default)]
    pub source: Option<PathBuf>,
    /// Build settings.
    #[serde(default)]
    pub build: BuildSpec,
    /// Container settings; without them the case stops after the build.
    #[serde(default)]
    pub run: Option<RunSpec>,
    /// Build and container expectations.
    #[serde(default)]
    pub expect: ExpectSpec,
    /// Requests issued once the container is ready.
    #[serde(default)]
    pub probes: Vec<ProbeSpec>,
}

/// Build section of a scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSpec {
    /// Buildpack coordinates, in order.
    pub buildpacks: Vec<String>,
    /// Engine pull policy.
    pub pull_policy: PullPolicy,
    /// Build-time environment.
    pub env: BTreeMap<String, String>,
    /// Labels to apply to the image.
    pub labels: BTreeMap<String, String>,
}

impl BuildSpec {
    /// Turns the section into a request building `source`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the request is invalid.
    pub fn to_request(&self, source: PathBuf, no_color: bool) -> Result<BuildRequest> {
        let mut builder = BuildRequest::builder(source)
            .buildpacks(self.buildpacks.iter().cloned())
            .pull_policy(self.pull_policy)
            .no_color(no_color);
        for (k, v) in &self.env {
            builder = builder.env(k.clone(), v.clone());
        }
        for (k, v) in &self.labels {
            builder = builder.label(k.clone(), v.clone());
        }
        builder.build()
    }
}

/// A published port: a bare container port or an explicit binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublishSpec {
    /// Container port on an ephemeral host port.
    Port(u16),
    /// Explicit binding.
    Binding(PortBinding),
}

impl PublishSpec {
    const fn binding(self) -> PortBinding {
        match self {
            Self::Port(p) => PortBinding::auto(p),
            Self::Binding(b) => b,
        }
    }
}

/// A fixture directory mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeSpec {
    /// Path relative to the fixture copy.
    pub host: PathBuf,
    /// Absolute mount point in the container.
    pub container: String,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// Run section of a scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSpec {
    /// Container environment.
    pub env: BTreeMap<String, String>,
    /// Ports to publish.
    pub publish: Vec<PublishSpec>,
    /// Also publish every exposed port.
    pub publish_all: bool,
    /// Fixture directories to mount.
    pub volumes: Vec<VolumeSpec>,
    /// Network mode.
    pub network: Option<String>,
    /// Readiness signal checked before probing.
    pub liveness: Liveness,
}

impl RunSpec {
    /// Turns the section into a request for `image`, resolving volume host
    /// paths against `fixture_root`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a volume host path escapes the fixture or the
    /// request is invalid.
    pub fn to_request(&self, image: ImageId, fixture_root: &Path) -> Result<RunRequest> {
        let mut builder = RunRequest::builder(image);
        for (k, v) in &self.env {
            builder = builder.env(k.clone(), v.clone());
        }
        for p in &self.publish {
            builder = builder.publish(p.binding());
        }
        if self.publish_all {
            builder = builder.publish_all();
        }
        for v in &self.volumes {
            let host = fixture_path(fixture_root, &v.host)?;
            builder = builder.volume_binding(packprobe_runtime::request::VolumeBinding {
                host_path: host,
                container_path: v.container.clone(),
                read_only: v.read_only,
            });
        }
        if let Some(network) = &self.network {
            builder = builder.network(network.clone());
        }
        builder.build()
    }
}

/// Expected layer metadata of one applied buildpack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildpackExpectation {
    /// Position in execution order.
    pub index: usize,
    /// Expected buildpack key.
    #[serde(default)]
    pub key: Option<String>,
    /// Layer whose metadata is checked.
    #[serde(default)]
    pub layer: Option<String>,
    /// Expected metadata entries of `layer`.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Expectations section of a scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpectSpec {
    /// Substrings that must each appear on some build log line.
    pub build_log: Vec<String>,
    /// Substrings that must appear on build log lines in this order.
    pub build_log_in_order: Vec<String>,
    /// Applied buildpack checks.
    pub buildpacks: Vec<BuildpackExpectation>,
    /// Expected image labels.
    pub labels: BTreeMap<String, String>,
    /// Substrings the container log must eventually contain.
    pub container_log: Vec<String>,
}

impl ExpectSpec {
    /// Records every build-related expectation against `build`.
    pub fn check_build(&self, expect: &mut Expectations, build: &BuildResult) {
        if !self.build_log.is_empty() {
            let needles: Vec<&str> = self.build_log.iter().map(String::as_str).collect();
            expect.log_contains_lines(&build.transcript, &needles);
        }
        if !self.build_log_in_order.is_empty() {
            let needles: Vec<&str> = self.build_log_in_order.iter().map(String::as_str).collect();
            expect.log_contains_lines_in_order(&build.transcript, &needles);
        }
        for bp in &self.buildpacks {
            if let Some(key) = &bp.key {
                expect.buildpack_key(&build.image, bp.index, key);
            }
            if let Some(layer) = &bp.layer {
                for (key, value) in &bp.metadata {
                    expect.layer_metadata(&build.image, bp.index, layer, key, value);
                }
            }
        }
        for (key, value) in &self.labels {
            expect.label(&build.image, key, value);
        }
    }
}

/// Client certificate material for a mutual-TLS probe, relative to the
/// fixture copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSpec {
    /// PEM client certificate.
    pub client_cert: PathBuf,
    /// PEM private key.
    pub client_key: PathBuf,
    /// PEM bundle replacing the system trust roots.
    pub trust_root: PathBuf,
}

/// One request against the running container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeSpec {
    /// Container port to probe.
    pub port: u16,
    /// URL scheme; `https` is implied by `tls`.
    #[serde(default)]
    pub scheme: Scheme,
    /// Request path.
    #[serde(default = "root_path")]
    pub path: String,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Expected status code.
    #[serde(default)]
    pub status: Option<u16>,
    /// Substring the body must contain.
    #[serde(default)]
    pub body_contains: Option<String>,
    /// Mutual-TLS material; the probe is retried when present.
    #[serde(default)]
    pub tls: Option<TlsSpec>,
}

fn root_path() -> String {
    "/".to_string()
}

impl ProbeSpec {
    /// Builds probe options, reading certificates from `fixture_root`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for paths escaping the fixture and `Io` for
    /// unreadable certificate files.
    pub fn to_options(&self, fixture_root: &Path, tls_retry: PollPolicy) -> Result<ProbeOptions> {
        let mut options = match &self.tls {
            Some(tls) => ProbeOptions::mutual_tls_from_files(
                self.path.clone(),
                &fixture_path(fixture_root, &tls.client_cert)?,
                &fixture_path(fixture_root, &tls.client_key)?,
                &fixture_path(fixture_root, &tls.trust_root)?,
                tls_retry,
            )?,
            None => ProbeOptions {
                scheme: self.scheme,
                ..ProbeOptions::http(self.path.clone())
            },
        };
        for (name, value) in &self.headers {
            options = options.header(name.clone(), value.clone());
        }
        Ok(options)
    }
}

/// Joins a fixture-relative path, refusing absolute paths and `..`.
fn fixture_path(root: &Path, relative: &Path) -> Result<PathBuf> {
    if relative
        .components()
        .any(|c| !matches!(c, std::path::Component::Normal(_) | std::path::Component::CurDir))
    {
        return Err(PackprobeError::Config {
            message: format!(
                "path must be relative to the fixture: {}",
                relative.display()
            ),
        });
    }
    Ok(root.join(relative))
}

impl Scenario {
    /// Parses a scenario document.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the YAML is malformed or has unknown fields.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| PackprobeError::Config {
            message: format!("invalid scenario: {e}"),
        })
    }

    /// Reads and parses a scenario file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read and `Config` if it does not
    /// parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PackprobeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&text)
    }

    /// Runs the scenario as one case.
    ///
    /// Order: fixture, build, build expectations, start, container log
    /// expectations, readiness, probes. Readiness is only awaited when
    /// there is something to probe.
    pub fn run(&self, harness: &Harness) -> CaseReport {
        harness.run_case(&self.name, |case| {
            let fixture = case.fixture(&self.fixture)?;
            let root = fixture.path().to_path_buf();
            let source = match &self.source {
                Some(sub) => fixture_path(&root, sub)?,
                None => root.clone(),
            };

            let request = self.build.to_request(source, case.config().no_color)?;
            let build = case.build(request)?;
            self.expect.check_build(case.expect(), &build);

            let Some(run) = &self.run else {
                return Ok(());
            };
            let container = case.start(run.to_request(build.image.id.clone(), &root)?)?;
            for needle in &self.expect.container_log {
                let _ = case.eventually_log_contains(&container, None, needle);
            }
            if self.probes.is_empty() {
                return Ok(());
            }

            let ready = case.wait_until_ready(&container, &run.liveness)?;
            for spec in &self.probes {
                let options = spec.to_options(&root, case.tls_retry())?;
                let response = case.probe(&ready, spec.port, &options)?;
                if let Some(status) = spec.status {
                    case.expect().status(&response, status);
                }
                if let Some(needle) = &spec.body_contains {
                    case.expect().body_contains(&response, needle);
                }
            }
            Ok(())
        })
    }
}
