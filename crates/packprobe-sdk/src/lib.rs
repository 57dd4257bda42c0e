//! # packprobe-sdk
//!
//! Verifies that a buildpack build produces a runnable image with the
//! expected behavior.
//!
//! Provides four entry points:
//! - [`Harness`](case::Harness): owns the engine, runtime, and configuration.
//! - [`Case`](case::Case): one sequential build-run-verify pipeline whose
//!   resources are released on every exit path.
//! - [`ProbeClient`](probe::ProbeClient): plain HTTP and mutual-TLS probes.
//! - [`Expectations`](assert::Expectations): per-case assertion context that
//!   collects mismatches instead of stopping at the first.
//!
//! # Example
//!
//! ```rust,no_run
//! use packprobe_common::config::HarnessConfig;
//! use packprobe_image::request::BuildRequest;
//! use packprobe_runtime::request::{PortBinding, RunRequest};
//! use packprobe_runtime::readiness::Liveness;
//! use packprobe_sdk::case::Harness;
//! use packprobe_sdk::probe::ProbeOptions;
//!
//! let harness = Harness::from_config(HarnessConfig::default());
//! let report = harness.run_case("pip", |case| {
//!     let source = case.fixture("pip")?.path().to_path_buf();
//!     let build = case.build(
//!         BuildRequest::builder(source)
//!             .buildpack("paketo-buildpacks/python")
//!             .build()?,
//!     )?;
//!     case.expect().log_contains_lines(&build.transcript, &["Pip Buildpack"]);
//!
//!     let container = case.start(
//!         RunRequest::builder(build.image.id.clone())
//!             .env("PORT", "8080")
//!             .publish(PortBinding::auto(8080))
//!             .build()?,
//!     )?;
//!     let ready = case.wait_until_ready(&container, &Liveness::Tcp)?;
//!     let response = case.probe(&ready, 8080, &ProbeOptions::http("/"))?;
//!     case.expect().status(&response, 200);
//!     case.expect().body_contains(&response, "Hello, World with pip!");
//!     Ok(())
//! });
//! assert!(report.passed());
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod assert;
pub mod case;
pub mod probe;
pub mod scenario;
