//! Container runtime backed by the `docker` CLI.

use std::collections::BTreeMap;

use packprobe_common::error::{PackprobeError, Result};
use packprobe_common::process::{self, CommandOutput};
use packprobe_common::types::{ContainerId, ImageId, LogTranscript, random_name};
use serde::Deserialize;

use super::ContainerRuntime;
use crate::container::Container;
use crate::logs::LogCursor;
use crate::request::RunRequest;

/// Runtime that shells out to `docker` (or a CLI-compatible binary).
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    /// Creates a runtime using the given executable.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Returns the `docker run` arguments for a request whose container is
    /// called `name`.
    ///
    /// Images are never pulled: a missing image is a start failure.
    #[must_use]
    pub fn run_args(request: &RunRequest, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--pull".to_string(),
            "never".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];
        for (key, value) in request.env() {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        for binding in request.publish() {
            args.push("--publish".to_string());
            args.push(binding.to_string());
        }
        if request.publish_all() {
            args.push("--publish-all".to_string());
        }
        for volume in request.volumes() {
            args.push("--volume".to_string());
            args.push(volume.to_string());
        }
        if let Some(network) = request.network() {
            args.push("--network".to_string());
            args.push(network.to_string());
        }
        args.push(request.image().to_string());
        args
    }

    fn exec(&self, operation: &'static str, args: &[&str]) -> Result<CommandOutput> {
        let output = process::run(&self.binary, args)?;
        if output.success() {
            Ok(output)
        } else {
            Err(PackprobeError::Runtime {
                operation,
                message: output.diagnostic(),
            })
        }
    }

    fn inspect_ports(&self, id: &ContainerId) -> Result<BTreeMap<u16, u16>> {
        let output = self.exec("inspect", &["container", "inspect", id.as_str()])?;
        parse_ports(&output.stdout)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(packprobe_common::constants::DEFAULT_DOCKER_BINARY)
    }
}

impl ContainerRuntime for DockerCli {
    fn start(&self, request: &RunRequest) -> Result<Container> {
        let image = request.image().to_string();
        tracing::info!(image = %image, ports = ?request.publish(), "starting container");

        let start_error = |message: String| PackprobeError::ContainerStart {
            image: image.clone(),
            message,
        };

        let name = request.name().map_or_else(random_name, str::to_string);
        let output = process::run(&self.binary, Self::run_args(request, &name))?;
        if !output.success() {
            // `docker run` can create the container and then fail to start
            // it (a taken host port), reporting no id.
            if let Err(cleanup) = self.remove(&ContainerId::new(name.clone())) {
                tracing::debug!(name = %name, error = %cleanup, "nothing to clean up after failed run");
            }
            return Err(start_error(output.diagnostic()));
        }
        let id = output
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(ContainerId::new)
            .ok_or_else(|| start_error("runtime did not report a container id".to_string()))?;

        let ports = match self.inspect_ports(&id) {
            Ok(ports) => ports,
            Err(e) => {
                // The container exists but is unusable; release it before failing.
                if let Err(cleanup) = self.remove(&id) {
                    tracing::warn!(id = %id.short(), error = %cleanup, "cleanup after failed inspect");
                }
                return Err(start_error(format!("cannot resolve published ports: {e}")));
            }
        };

        tracing::info!(id = %id.short(), ports = ?ports, "container started");
        Ok(Container::new(id, request.image().clone(), ports))
    }

    fn logs_since(&self, id: &ContainerId, since: Option<&LogCursor>) -> Result<LogTranscript> {
        let since_arg = since.map(LogCursor::to_since_arg);
        let mut args = vec!["container", "logs"];
        if let Some(s) = since_arg.as_deref() {
            args.push("--since");
            args.push(s);
        }
        args.push(id.as_str());
        let output = self.exec("logs", &args)?;
        Ok(LogTranscript::from_output(&output.combined()))
    }

    fn stop(&self, id: &ContainerId) -> Result<()> {
        tracing::debug!(id = %id.short(), "stopping container");
        let _ = self.exec("stop", &["container", "stop", id.as_str()])?;
        Ok(())
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        tracing::debug!(id = %id.short(), "removing container");
        let _ = self.exec("rm", &["container", "rm", "--force", "--volumes", id.as_str()])?;
        Ok(())
    }

    fn remove_image(&self, id: &ImageId) -> Result<()> {
        tracing::debug!(image = %id, "removing image");
        match self.exec("image rm", &["image", "rm", "--force", id.as_str()]) {
            Err(PackprobeError::Runtime { message, .. }) if message.contains("No such image") => {
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    fn remove_volumes(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        tracing::debug!(volumes = ?names, "removing volumes");
        let mut args = vec!["volume", "rm", "--force"];
        args.extend(names.iter().map(String::as_str));
        let _ = self.exec("volume rm", &args)?;
        Ok(())
    }

    fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    #[serde(default)]
    network_settings: NetworkSettings,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(default)]
    ports: Option<BTreeMap<String, Option<Vec<HostBinding>>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostBinding {
    #[serde(default)]
    host_port: String,
}

/// Extracts the TCP container-port to host-port map from
/// `docker container inspect` output.
///
/// Exposed ports without a host binding are skipped. When a port is bound
/// on several host addresses the first binding wins.
///
/// # Errors
///
/// Returns `Serialization` for invalid JSON and `NotFound` for an empty
/// result.
pub fn parse_ports(output: &str) -> Result<BTreeMap<u16, u16>> {
    let entries: Vec<InspectEntry> = serde_json::from_str(output)?;
    let entry = entries.into_iter().next().ok_or(PackprobeError::NotFound {
        kind: "container",
        id: "inspect result".to_string(),
    })?;

    let mut ports = BTreeMap::new();
    for (key, bindings) in entry.network_settings.ports.unwrap_or_default() {
        let Some(port) = key.strip_suffix("/tcp").and_then(|p| p.parse::<u16>().ok()) else {
            continue;
        };
        let host_port = bindings
            .unwrap_or_default()
            .iter()
            .find_map(|b| b.host_port.parse::<u16>().ok());
        if let Some(host_port) = host_port {
            let _ = ports.insert(port, host_port);
        }
    }
    Ok(ports)
}
