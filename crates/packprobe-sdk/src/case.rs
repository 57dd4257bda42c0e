//! Verification cases.
//!
//! A [`Case`] walks one pipeline strictly in sequence: resolve a fixture,
//! build, start, wait for readiness, probe, assert. Each acquired resource
//! gets a guard the moment it exists, so an error return or a panic in the
//! case body still releases the container, the image and its cache
//! volumes, and the fixture copy, in that order.

use std::sync::Arc;
use std::time::Duration;

use packprobe_common::config::HarnessConfig;
use packprobe_common::error::{Mismatch, PackprobeError, Result};
use packprobe_common::poll::PollPolicy;
use packprobe_common::types::{ImageId, LogTranscript, random_name};
use packprobe_image::cache::cache_volume_names;
use packprobe_image::descriptor::BuildResult;
use packprobe_image::engine::{BuildEngine, PackCli};
use packprobe_image::fixture::{FixtureDir, FixtureResolver};
use packprobe_image::request::BuildRequest;
use packprobe_runtime::backend::docker::DockerCli;
use packprobe_runtime::backend::ContainerRuntime;
use packprobe_runtime::container::{Container, ContainerGuard};
use packprobe_runtime::logs::LogCursor;
use packprobe_runtime::readiness::{Liveness, ReadinessPoller};
use packprobe_runtime::request::RunRequest;

use crate::assert::Expectations;
use crate::probe::{ProbeClient, ProbeOptions, ProbeResult, ProbeTarget};

/// Shared entry point: configuration plus the engine and runtime every case
/// talks to.
pub struct Harness {
    config: HarnessConfig,
    engine: Arc<dyn BuildEngine>,
    runtime: Arc<dyn ContainerRuntime>,
    fixtures: FixtureResolver,
}

impl Harness {
    /// Creates a harness around an explicit engine and runtime.
    #[must_use]
    pub fn new(
        config: HarnessConfig,
        engine: Arc<dyn BuildEngine>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let fixtures = FixtureResolver::new(config.fixture_root.clone());
        Self {
            config,
            engine,
            runtime,
            fixtures,
        }
    }

    /// Creates a harness driving the `pack` and `docker` CLIs named in `config`.
    #[must_use]
    pub fn from_config(config: HarnessConfig) -> Self {
        let engine = Arc::new(PackCli::new(
            config.pack_binary.clone(),
            config.docker_binary.clone(),
        ));
        let runtime = Arc::new(DockerCli::new(config.docker_binary.clone()));
        Self::new(config, engine, runtime)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Returns the container runtime.
    #[must_use]
    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    /// Checks that the build engine and container runtime can be invoked.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` naming the first missing executable.
    pub fn check_prerequisites(&self) -> Result<()> {
        if !self.engine.is_available() {
            return Err(PackprobeError::NotFound {
                kind: "build engine",
                id: self.config.pack_binary.clone(),
            });
        }
        if !self.runtime.is_available() {
            return Err(PackprobeError::NotFound {
                kind: "container runtime",
                id: self.config.docker_binary.clone(),
            });
        }
        Ok(())
    }

    /// Opens a new case with freshly generated resource names.
    ///
    /// Prefer [`Harness::run_case`], which also finishes the case.
    #[must_use]
    pub fn case(&self, label: &str) -> Case<'_> {
        Case::new(self, label)
    }

    /// Runs `body` as one case and tears down whatever it acquired.
    ///
    /// An error returned by `body` is the verdict; otherwise the verdict is
    /// the outcome of the recorded expectations. Teardown failures are
    /// reported next to the verdict and never change it. If `body` panics,
    /// the guards still release every resource while the panic unwinds.
    pub fn run_case<F>(&self, label: &str, body: F) -> CaseReport
    where
        F: FnOnce(&mut Case<'_>) -> Result<()>,
    {
        let mut case = self.case(label);
        let span = tracing::info_span!("case", case = %label, name = %case.name);
        let _entered = span.enter();
        tracing::info!("case started");
        let outcome = body(&mut case);
        case.finish(outcome)
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A container whose published ports passed a liveness check.
///
/// Only [`Case::wait_until_ready`] creates one, so a probe cannot be issued
/// against a container whose port mapping has not been confirmed.
#[derive(Debug, Clone)]
pub struct ReadyContainer {
    container: Container,
}

impl ReadyContainer {
    /// Returns the underlying container.
    #[must_use]
    pub const fn container(&self) -> &Container {
        &self.container
    }

    /// Returns the probe target for `container_port`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the port was not published.
    pub fn target(&self, container_port: u16) -> Result<ProbeTarget> {
        let addr = self.container.address(container_port)?;
        Ok(ProbeTarget::localhost(addr.port()))
    }
}

/// Removes an image and its build cache volumes once.
///
/// Registered before the build starts: a failed build can still leave cache
/// volumes behind.
struct ImageGuard {
    runtime: Arc<dyn ContainerRuntime>,
    name: String,
    built: Vec<ImageId>,
    armed: bool,
}

impl ImageGuard {
    fn new(runtime: Arc<dyn ContainerRuntime>, name: &str) -> Self {
        Self {
            runtime,
            name: name.to_string(),
            built: Vec::new(),
            armed: true,
        }
    }

    fn teardown(mut self) -> Result<()> {
        self.armed = false;
        self.remove()
    }

    fn release(mut self) {
        self.armed = false;
        tracing::info!(image = %self.name, "keeping image and cache volumes");
    }

    fn remove(&self) -> Result<()> {
        let mut failures = Vec::new();
        let targets = if self.built.is_empty() {
            vec![ImageId::new(self.name.clone())]
        } else {
            self.built.clone()
        };
        for id in &targets {
            if let Err(e) = self.runtime.remove_image(id) {
                failures.push(format!("image {id}: {e}"));
            }
        }
        if let Err(e) = self.runtime.remove_volumes(&cache_volume_names(&self.name)) {
            failures.push(format!("cache volumes: {e}"));
        }
        if failures.is_empty() {
            tracing::info!(image = %self.name, "image torn down");
            Ok(())
        } else {
            Err(PackprobeError::Teardown {
                resource: format!("image {}", self.name),
                message: failures.join("; "),
            })
        }
    }
}

impl Drop for ImageGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.remove() {
                tracing::warn!(image = %self.name, error = %e, "teardown on drop failed");
            }
        }
    }
}

/// One build-run-verify pipeline.
///
/// Field order is teardown order: containers, then the image, then the
/// fixture copy.
pub struct Case<'h> {
    containers: Vec<ContainerGuard>,
    image: Option<ImageGuard>,
    fixture: Option<FixtureDir>,
    expectations: Expectations,
    harness: &'h Harness,
    label: String,
    name: String,
}

impl<'h> Case<'h> {
    fn new(harness: &'h Harness, label: &str) -> Self {
        let config = &harness.config;
        Self {
            containers: Vec::new(),
            image: None,
            fixture: None,
            expectations: Expectations::new(
                label,
                PollPolicy::new(config.poll_interval, config.log_timeout),
            ),
            harness,
            label: label.to_string(),
            name: random_name(),
        }
    }

    /// Returns the human-readable case label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the unique name used for the image built by this case.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the harness configuration.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.harness.config
    }

    /// Copies fixture `name` into a private directory owned by this case.
    ///
    /// A second call replaces (and deletes) the previous copy.
    ///
    /// # Errors
    ///
    /// Returns `FixtureNotFound` if no such fixture exists.
    pub fn fixture(&mut self, name: &str) -> Result<&FixtureDir> {
        let dir = self.harness.fixtures.resolve(name)?;
        Ok(self.fixture.insert(dir))
    }

    /// Returns the fixture copy, if one was resolved.
    #[must_use]
    pub const fn fixture_dir(&self) -> Option<&FixtureDir> {
        self.fixture.as_ref()
    }

    /// Builds `request` into this case's image, blocking until done.
    ///
    /// # Errors
    ///
    /// Returns `Build` with the transcript if the engine fails.
    pub fn build(&mut self, request: BuildRequest) -> Result<BuildResult> {
        let runtime = &self.harness.runtime;
        let guard = self
            .image
            .get_or_insert_with(|| ImageGuard::new(Arc::clone(runtime), &self.name));
        tracing::info!(
            image = %self.name,
            buildpacks = ?request.buildpacks(),
            "building image"
        );
        let result = self.harness.engine.build(&self.name, &request)?;
        guard.built.push(result.image.id.clone());
        tracing::info!(
            image = %self.name,
            id = %result.image.id,
            buildpacks = result.image.buildpacks.len(),
            "image built"
        );
        Ok(result)
    }

    /// Starts a container and registers its teardown.
    ///
    /// # Errors
    ///
    /// Returns `ContainerStart` if the runtime refuses the request.
    pub fn start(&mut self, request: RunRequest) -> Result<Container> {
        let container = self.harness.runtime.start(&request)?;
        tracing::info!(
            id = %container.id.short(),
            image = %container.image,
            ports = ?container.ports,
            "container started"
        );
        self.containers.push(ContainerGuard::new(
            Arc::clone(&self.harness.runtime),
            container.clone(),
        ));
        Ok(container)
    }

    /// Waits up to the configured readiness timeout for `container`.
    ///
    /// # Errors
    ///
    /// Returns `ReadinessTimeout` if the ports never become live.
    pub fn wait_until_ready(
        &self,
        container: &Container,
        liveness: &Liveness,
    ) -> Result<ReadyContainer> {
        self.wait_until_ready_within(container, liveness, self.harness.config.readiness_timeout)
    }

    /// Waits up to `timeout` for `container`.
    ///
    /// # Errors
    ///
    /// Returns `ReadinessTimeout` if the ports never become live.
    pub fn wait_until_ready_within(
        &self,
        container: &Container,
        liveness: &Liveness,
        timeout: Duration,
    ) -> Result<ReadyContainer> {
        ReadinessPoller::new(liveness.clone(), self.harness.config.poll_interval)
            .wait_until_ready(container, timeout)?;
        Ok(ReadyContainer {
            container: container.clone(),
        })
    }

    /// Probes `container_port` of a ready container.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the port is not published, `Config` for
    /// unusable certificate material, and `Probe` on transport failure.
    pub fn probe(
        &self,
        ready: &ReadyContainer,
        container_port: u16,
        options: &ProbeOptions,
    ) -> Result<ProbeResult> {
        let target = ready.target(container_port)?;
        ProbeClient::new(options.clone())?.probe(&target)
    }

    /// Retry policy for mutual-TLS probes.
    #[must_use]
    pub const fn tls_retry(&self) -> PollPolicy {
        PollPolicy::new(
            self.harness.config.poll_interval,
            self.harness.config.tls_retry_timeout,
        )
    }

    /// Returns the container's output, optionally only after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot read the logs.
    pub fn logs(&self, container: &Container, since: Option<&LogCursor>) -> Result<LogTranscript> {
        self.harness.runtime.logs_since(&container.id, since)
    }

    /// Expects the container log to contain `needle` within the configured
    /// log timeout.
    pub fn eventually_log_contains(
        &mut self,
        container: &Container,
        since: Option<&LogCursor>,
        needle: &str,
    ) -> bool {
        self.expectations.eventually_log_contains(
            self.harness.runtime.as_ref(),
            &container.id,
            since,
            needle,
        )
    }

    /// Returns the case's assertion context.
    pub fn expect(&mut self) -> &mut Expectations {
        &mut self.expectations
    }

    /// Tears everything down and settles the verdict.
    fn finish(self, outcome: Result<()>) -> CaseReport {
        let Self {
            containers,
            image,
            fixture,
            expectations,
            harness,
            label,
            name,
        } = self;
        let config = &harness.config;
        let mut teardown_errors = Vec::new();

        for guard in containers.into_iter().rev() {
            if config.keep_container {
                if let Some(c) = guard.release() {
                    tracing::info!(id = %c.id.short(), "keeping container");
                }
            } else if let Err(e) = guard.teardown() {
                teardown_errors.push(e);
            }
        }
        if let Some(guard) = image {
            if config.keep_image {
                guard.release();
            } else if let Err(e) = guard.teardown() {
                teardown_errors.push(e);
            }
        }
        if let Some(dir) = fixture {
            if let Err(e) = dir.close() {
                teardown_errors.push(e);
            }
        }
        for e in &teardown_errors {
            tracing::warn!(error = %e, "teardown failed");
        }

        let mismatches = expectations.failures().to_vec();
        let verdict = match outcome {
            Err(e) => {
                if !mismatches.is_empty() {
                    tracing::warn!(
                        failures = mismatches.len(),
                        "case aborted with expectations already failing"
                    );
                }
                Err(e)
            }
            Ok(()) => expectations.finish(),
        };
        match &verdict {
            Ok(()) => tracing::info!("case passed"),
            Err(e) => tracing::warn!(error = %e, "case failed"),
        }

        CaseReport {
            label,
            name,
            verdict,
            mismatches,
            teardown_errors,
        }
    }
}

impl std::fmt::Debug for Case<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Case")
            .field("label", &self.label)
            .field("name", &self.name)
            .field("containers", &self.containers)
            .field("fixture", &self.fixture)
            .finish_non_exhaustive()
    }
}

/// Outcome of a finished case.
#[derive(Debug)]
pub struct CaseReport {
    /// Case label.
    pub label: String,
    /// Generated resource name.
    pub name: String,
    /// Pass, or the first aborting error, or every failed expectation.
    pub verdict: Result<()>,
    /// Expectations that failed, including those recorded before an
    /// aborting error.
    pub mismatches: Vec<Mismatch>,
    /// Cleanup failures, reported without changing the verdict.
    pub teardown_errors: Vec<PackprobeError>,
}

impl CaseReport {
    /// Returns `true` if the case passed, regardless of teardown errors.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.verdict.is_ok()
    }

    /// Returns `true` if the case passed and cleaned up completely.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.passed() && self.teardown_errors.is_empty()
    }

    /// Converts the report into its verdict.
    ///
    /// # Errors
    ///
    /// Returns the verdict's error if the case failed.
    pub fn into_result(self) -> Result<()> {
        self.verdict
    }
}
