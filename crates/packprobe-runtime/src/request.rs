//! Immutable container run requests.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use packprobe_common::error::{PackprobeError, Result};
use packprobe_common::types::ImageId;
use serde::{Deserialize, Serialize};

/// A container port to publish, optionally pinned to a host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    /// Port the process listens on inside the container.
    pub container_port: u16,
    /// Host port to bind, or `None` for an ephemeral one.
    pub host_port: Option<u16>,
}

impl PortBinding {
    /// Publishes `container_port` on an ephemeral host port.
    #[must_use]
    pub const fn auto(container_port: u16) -> Self {
        Self {
            container_port,
            host_port: None,
        }
    }

    /// Publishes `container_port` on a fixed host port.
    #[must_use]
    pub const fn fixed(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port,
            host_port: Some(host_port),
        }
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host_port {
            Some(host) => write!(f, "{host}:{}", self.container_port),
            None => write!(f, "{}", self.container_port),
        }
    }
}

/// A host directory mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBinding {
    /// Directory on the host.
    pub host_path: PathBuf,
    /// Mount point inside the container.
    pub container_path: String,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

impl fmt::Display for VolumeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_path.display(), self.container_path)?;
        if self.read_only {
            write!(f, ":ro")?;
        }
        Ok(())
    }
}

/// Everything needed to start a container from a built image.
///
/// Constructed through [`RunRequestBuilder`]; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    image: ImageId,
    name: Option<String>,
    env: BTreeMap<String, String>,
    publish: Vec<PortBinding>,
    publish_all: bool,
    volumes: Vec<VolumeBinding>,
    network: Option<String>,
}

impl RunRequest {
    /// Starts a request for `image`.
    #[must_use]
    pub fn builder(image: ImageId) -> RunRequestBuilder {
        RunRequestBuilder::new(image)
    }

    /// Image to run.
    #[must_use]
    pub const fn image(&self) -> &ImageId {
        &self.image
    }

    /// Container name, if one was assigned.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Runtime environment.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Explicitly published ports.
    #[must_use]
    pub fn publish(&self) -> &[PortBinding] {
        &self.publish
    }

    /// Whether every exposed port is published as well.
    #[must_use]
    pub const fn publish_all(&self) -> bool {
        self.publish_all
    }

    /// Volume bindings.
    #[must_use]
    pub fn volumes(&self) -> &[VolumeBinding] {
        &self.volumes
    }

    /// Network mode, if not the runtime default.
    #[must_use]
    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }
}

/// Fluent builder for [`RunRequest`].
#[derive(Debug)]
pub struct RunRequestBuilder {
    request: RunRequest,
}

impl RunRequestBuilder {
    /// Creates a builder for `image` with nothing published.
    #[must_use]
    pub const fn new(image: ImageId) -> Self {
        Self {
            request: RunRequest {
                image,
                name: None,
                env: BTreeMap::new(),
                publish: Vec::new(),
                publish_all: false,
                volumes: Vec::new(),
                network: None,
            },
        }
    }

    /// Names the container.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.request.name = Some(name.into());
        self
    }

    /// Sets a runtime environment variable; later values win.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.request.env.insert(key.into(), value.into());
        self
    }

    /// Publishes a container port.
    #[must_use]
    pub fn publish(mut self, binding: PortBinding) -> Self {
        self.request.publish.push(binding);
        self
    }

    /// Publishes every port the image exposes on ephemeral host ports.
    #[must_use]
    pub const fn publish_all(mut self) -> Self {
        self.request.publish_all = true;
        self
    }

    /// Mounts `host_path` at `container_path`.
    #[must_use]
    pub fn volume(mut self, host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        self.request.volumes.push(VolumeBinding {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        });
        self
    }

    /// Adds a fully specified volume binding.
    #[must_use]
    pub fn volume_binding(mut self, binding: VolumeBinding) -> Self {
        self.request.volumes.push(binding);
        self
    }

    /// Selects the network mode.
    #[must_use]
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.request.network = Some(network.into());
        self
    }

    /// Validates and freezes the request.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an empty environment key, a zero port, a port
    /// published twice, or a relative container mount point.
    pub fn build(self) -> Result<RunRequest> {
        let req = self.request;
        if req.env.keys().any(String::is_empty) {
            return Err(config("environment variable key must not be empty"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for binding in &req.publish {
            if binding.container_port == 0 || binding.host_port == Some(0) {
                return Err(config(format!("port must be non-zero: {binding}")));
            }
            if !seen.insert(binding.container_port) {
                return Err(config(format!(
                    "container port {} published twice",
                    binding.container_port
                )));
            }
        }
        if let Some(v) = req.volumes.iter().find(|v| !v.container_path.starts_with('/')) {
            return Err(config(format!("container mount point must be absolute: {v}")));
        }
        Ok(req)
    }
}

fn config(message: impl Into<String>) -> PackprobeError {
    PackprobeError::Config {
        message: message.into(),
    }
}
