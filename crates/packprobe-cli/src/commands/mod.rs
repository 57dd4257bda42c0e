//! CLI command definitions and dispatch.

pub mod build;
pub mod clean;
pub mod logs;
pub mod run;
pub mod verify;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use packprobe_common::config::HarnessConfig;
use packprobe_sdk::case::Harness;

/// packprobe — build, run, and verify buildpack apps.
#[derive(Parser, Debug)]
#[command(name = "packprobe", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Harness settings shared by every subcommand.
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Log line format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Overrides applied on top of defaults and `PACKPROBE_*` variables.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// Directory containing fixture trees.
    #[arg(long, global = true)]
    pub fixture_root: Option<PathBuf>,

    /// `pack` executable.
    #[arg(long, global = true)]
    pub pack: Option<String>,

    /// `docker` executable.
    #[arg(long, global = true)]
    pub docker: Option<String>,

    /// Readiness timeout in seconds.
    #[arg(long, global = true)]
    pub readiness_timeout: Option<u64>,

    /// Mutual-TLS probe retry timeout in seconds.
    #[arg(long, global = true)]
    pub tls_retry_timeout: Option<u64>,

    /// Keep built images and their cache volumes.
    #[arg(long, global = true)]
    pub keep_image: bool,

    /// Leave containers running.
    #[arg(long, global = true)]
    pub keep_container: bool,
}

impl ConfigArgs {
    /// Resolves the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a `PACKPROBE_*` variable is malformed.
    pub fn resolve(&self) -> anyhow::Result<HarnessConfig> {
        let mut config = HarnessConfig::from_env()?;
        if let Some(root) = &self.fixture_root {
            config.fixture_root.clone_from(root);
        }
        if let Some(pack) = &self.pack {
            config.pack_binary.clone_from(pack);
        }
        if let Some(docker) = &self.docker {
            config.docker_binary.clone_from(docker);
        }
        if let Some(secs) = self.readiness_timeout {
            config.readiness_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.tls_retry_timeout {
            config.tls_retry_timeout = Duration::from_secs(secs);
        }
        config.keep_image |= self.keep_image;
        config.keep_container |= self.keep_container;
        Ok(config)
    }

    /// Builds a harness over the real `pack` and `docker` CLIs.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a tool is
    /// missing.
    pub fn harness(&self) -> anyhow::Result<Harness> {
        let harness = Harness::from_config(self.resolve()?);
        harness.check_prerequisites()?;
        Ok(harness)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run scenario files and report each verdict.
    Verify(verify::VerifyArgs),
    /// Build a fixture and print the image metadata.
    Build(build::BuildArgs),
    /// Start a built image and keep it up until Ctrl+C.
    Run(run::RunArgs),
    /// Print container logs.
    Logs(logs::LogsArgs),
    /// Remove an image and its build cache volumes.
    Clean(clean::CleanArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Verify(args) => verify::execute(&cli.config, args),
        Command::Build(args) => build::execute(&cli.config, args),
        Command::Run(args) => run::execute(&cli.config, args),
        Command::Logs(args) => logs::execute(&cli.config, &args),
        Command::Clean(args) => clean::execute(&cli.config, &args),
    }
}

/// Parses a `KEY=VALUE` argument; the value may be empty or contain `=`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}
