//! Container runtime abstraction.

pub mod docker;

use packprobe_common::error::Result;
use packprobe_common::types::{ContainerId, ImageId, LogTranscript};

use crate::container::Container;
use crate::logs::LogCursor;
use crate::request::RunRequest;

/// The runtime that starts, inspects, and removes containers.
///
/// Every call is a blocking foreign call that either succeeds or fails
/// once; only the readiness poller retries.
pub trait ContainerRuntime: Send + Sync {
    /// Starts a container and resolves its published host ports.
    ///
    /// # Errors
    ///
    /// Returns `ContainerStart` if the runtime refuses the request or the
    /// image is missing.
    fn start(&self, request: &RunRequest) -> Result<Container>;

    /// Returns the container's output, optionally only what was printed
    /// after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if logs cannot be retrieved.
    fn logs_since(&self, id: &ContainerId, since: Option<&LogCursor>) -> Result<LogTranscript>;

    /// Stops a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be stopped.
    fn stop(&self, id: &ContainerId) -> Result<()>;

    /// Removes a container and its anonymous volumes.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be removed.
    fn remove(&self, id: &ContainerId) -> Result<()>;

    /// Removes an image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be removed.
    fn remove_image(&self, id: &ImageId) -> Result<()>;

    /// Removes named volumes; names that do not exist are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing volume cannot be removed.
    fn remove_volumes(&self, names: &[String]) -> Result<()>;

    /// Returns whether this runtime is operational on the current host.
    fn is_available(&self) -> bool;
}
