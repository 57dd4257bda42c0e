//! System-wide constants and defaults.

use std::time::Duration;

/// Application name used as the prefix of generated resource names.
pub const APP_NAME: &str = "packprobe";

/// Default directory holding named fixtures, relative to the working directory.
pub const DEFAULT_FIXTURE_ROOT: &str = "testdata";

/// Default build engine executable.
pub const DEFAULT_PACK_BINARY: &str = "pack";

/// Default container runtime executable.
pub const DEFAULT_DOCKER_BINARY: &str = "docker";

/// Default upper bound for a container to start accepting connections.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between liveness checks and other poll attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default upper bound for mutual-TLS probe retries.
pub const DEFAULT_TLS_RETRY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default upper bound for a container log to contain an expected line.
pub const DEFAULT_LOG_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request timeout used by the probe client.
pub const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Label under which the buildpack lifecycle records applied buildpacks.
pub const LIFECYCLE_METADATA_LABEL: &str = "io.buildpacks.lifecycle.metadata";

/// Build variable consumed by the image-labels buildpack.
pub const IMAGE_LABELS_ENV: &str = "BP_IMAGE_LABELS";

/// Prefix of environment entries the environment-variables buildpack embeds.
pub const EMBEDDED_ENV_PREFIX: &str = "BPE_";

/// Prefix for environment variable overrides of [`crate::config::HarnessConfig`].
pub const ENV_PREFIX: &str = "PACKPROBE_";
