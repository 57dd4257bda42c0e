//! Build engine boundary.
//!
//! A build is a single blocking foreign call: either an image descriptor
//! plus the full transcript, or a `Build` error that carries whatever the
//! engine printed before failing.

use packprobe_common::error::{PackprobeError, Result};
use packprobe_common::process::{self, CommandOutput};
use packprobe_common::types::LogTranscript;

use crate::descriptor::{self, BuildResult};
use crate::request::BuildRequest;

/// Something that turns a source tree into a runnable image.
pub trait BuildEngine: Send + Sync {
    /// Builds `request` into an image tagged `name`, blocking until done.
    ///
    /// # Errors
    ///
    /// Returns `Build` (with the transcript) if the engine exits non-zero
    /// or its output cannot be interpreted.
    fn build(&self, name: &str, request: &BuildRequest) -> Result<BuildResult>;

    /// Returns whether the engine can be invoked on this host.
    fn is_available(&self) -> bool;
}

/// [`BuildEngine`] backed by the `pack` CLI, with image metadata read back
/// through `docker image inspect`.
#[derive(Debug, Clone)]
pub struct PackCli {
    pack: String,
    docker: String,
}

impl PackCli {
    /// Creates an engine using the given `pack` and `docker` executables.
    #[must_use]
    pub fn new(pack: impl Into<String>, docker: impl Into<String>) -> Self {
        Self {
            pack: pack.into(),
            docker: docker.into(),
        }
    }

    /// Returns the `pack build` arguments for a request.
    #[must_use]
    pub fn build_args(name: &str, request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            name.to_string(),
            "--path".to_string(),
            request.source().display().to_string(),
            "--pull-policy".to_string(),
            request.pull_policy().as_str().to_string(),
        ];
        if request.no_color() {
            args.push("--no-color".to_string());
        }
        for buildpack in request.buildpacks() {
            args.push("--buildpack".to_string());
            args.push(buildpack.clone());
        }
        for (key, value) in request.engine_env() {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        args
    }

    fn inspect(&self, name: &str, transcript: &LogTranscript) -> Result<BuildResult> {
        let output = process::run(&self.docker, ["image", "inspect", name])?;
        if !output.success() {
            return Err(build_error(
                name,
                format!("image inspect failed: {}", output.diagnostic()),
                transcript.clone(),
            ));
        }
        let image = descriptor::parse_inspect(name, &output.stdout).map_err(|e| {
            build_error(
                name,
                format!("malformed image metadata: {e}"),
                transcript.clone(),
            )
        })?;
        Ok(BuildResult {
            image,
            transcript: transcript.clone(),
        })
    }
}

impl Default for PackCli {
    fn default() -> Self {
        Self::new(
            packprobe_common::constants::DEFAULT_PACK_BINARY,
            packprobe_common::constants::DEFAULT_DOCKER_BINARY,
        )
    }
}

impl BuildEngine for PackCli {
    fn build(&self, name: &str, request: &BuildRequest) -> Result<BuildResult> {
        tracing::info!(
            image = name,
            source = %request.source().display(),
            buildpacks = ?request.buildpacks(),
            pull_policy = %request.pull_policy(),
            "building image"
        );

        let output = process::run(&self.pack, Self::build_args(name, request))?;
        let transcript = LogTranscript::from_output(&output.combined());
        check_build_output(name, &output, &transcript)?;

        let result = self.inspect(name, &transcript)?;
        tracing::info!(
            image = name,
            id = %result.image.id,
            buildpacks = result.image.buildpacks.len(),
            "image built"
        );
        Ok(result)
    }

    fn is_available(&self) -> bool {
        which::which(&self.pack).is_ok() && which::which(&self.docker).is_ok()
    }
}

fn build_error(image: &str, message: String, transcript: LogTranscript) -> PackprobeError {
    PackprobeError::Build {
        image: image.to_string(),
        message,
        transcript,
    }
}

/// Classifies a finished engine run.
fn check_build_output(name: &str, output: &CommandOutput, transcript: &LogTranscript) -> Result<()> {
    if !output.success() {
        tracing::warn!(image = name, exit_code = output.exit_code, "build failed");
        return Err(build_error(
            name,
            format!("engine exited with code {}", output.exit_code),
            transcript.clone(),
        ));
    }
    if transcript.is_empty() {
        return Err(build_error(
            name,
            "engine produced no output".to_string(),
            transcript.clone(),
        ));
    }
    Ok(())
}
