//! Started containers and their guaranteed teardown.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use packprobe_common::error::{PackprobeError, Result};
use packprobe_common::types::{ContainerId, ImageId};

use crate::backend::ContainerRuntime;

/// A container the runtime acknowledged as started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Runtime-assigned identifier.
    pub id: ContainerId,
    /// Image the container runs.
    pub image: ImageId,
    /// Container port to host port, resolved after start.
    pub ports: BTreeMap<u16, u16>,
    /// Host address the published ports are reachable on.
    pub host: IpAddr,
}

impl Container {
    /// Creates a container record reachable on localhost.
    #[must_use]
    pub fn new(id: ContainerId, image: ImageId, ports: BTreeMap<u16, u16>) -> Self {
        Self {
            id,
            image,
            ports,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    /// Returns the host port `container_port` was published on.
    #[must_use]
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port).copied()
    }

    /// Returns the host socket address for `container_port`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the port was not published.
    pub fn address(&self, container_port: u16) -> Result<SocketAddr> {
        self.host_port(container_port)
            .map(|p| SocketAddr::new(self.host, p))
            .ok_or_else(|| PackprobeError::NotFound {
                kind: "published port",
                id: format!("{container_port} on container {}", self.id.short()),
            })
    }
}

/// Stops and removes a container, attempting removal even if stopping fails.
///
/// # Errors
///
/// Returns `Teardown` describing every step that failed.
pub fn teardown(runtime: &dyn ContainerRuntime, id: &ContainerId) -> Result<()> {
    let mut failures = Vec::new();
    if let Err(e) = runtime.stop(id) {
        failures.push(format!("stop: {e}"));
    }
    if let Err(e) = runtime.remove(id) {
        failures.push(format!("remove: {e}"));
    }
    if failures.is_empty() {
        tracing::info!(id = %id.short(), "container torn down");
        Ok(())
    } else {
        Err(PackprobeError::Teardown {
            resource: format!("container {}", id.short()),
            message: failures.join("; "),
        })
    }
}

/// Owns a started container and tears it down exactly once.
///
/// Create the guard immediately after a successful start. Teardown happens
/// on [`ContainerGuard::teardown`] or, failing that, on drop, so a panic or
/// an early return elsewhere in the case still releases the container.
/// Errors during drop are logged because they cannot be returned.
pub struct ContainerGuard {
    runtime: Arc<dyn ContainerRuntime>,
    container: Option<Container>,
}

impl ContainerGuard {
    /// Takes ownership of `container`'s lifecycle.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, container: Container) -> Self {
        tracing::debug!(id = %container.id.short(), "teardown registered");
        Self {
            runtime,
            container: Some(container),
        }
    }

    /// Tears the container down now and reports the outcome.
    ///
    /// # Errors
    ///
    /// Returns `Teardown` if stop or remove failed.
    pub fn teardown(mut self) -> Result<()> {
        match self.container.take() {
            Some(c) => teardown(self.runtime.as_ref(), &c.id),
            None => Ok(()),
        }
    }

    /// Disarms the guard and hands the container back to the caller,
    /// who becomes responsible for tearing it down.
    #[must_use]
    pub fn release(mut self) -> Option<Container> {
        self.container.take()
    }
}

impl std::fmt::Debug for ContainerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerGuard")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if let Some(c) = self.container.take() {
            if let Err(e) = teardown(self.runtime.as_ref(), &c.id) {
                tracing::warn!(id = %c.id.short(), error = %e, "teardown on drop failed");
            }
        }
    }
}
