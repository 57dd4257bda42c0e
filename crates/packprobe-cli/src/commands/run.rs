//! `packprobe run` — Start a built image and keep it up until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Args;
use packprobe_common::types::ImageId;
use packprobe_runtime::readiness::Liveness;
use packprobe_runtime::request::{PortBinding, RunRequest, VolumeBinding};

use crate::commands::{ConfigArgs, parse_key_value};
use crate::output::{self, BOLD, CYAN, GREEN, RESET, Style};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image name or ID.
    pub image: String,

    /// Container port to publish on an ephemeral host port.
    #[arg(short, long = "publish", required = true)]
    pub publish: Vec<u16>,

    /// Also publish every exposed port.
    #[arg(long)]
    pub publish_all: bool,

    /// Container environment variable.
    #[arg(short, long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Bind mount as `HOST:CONTAINER`.
    #[arg(short, long, value_parser = parse_volume)]
    pub volume: Vec<VolumeBinding>,

    /// Network mode.
    #[arg(long)]
    pub network: Option<String>,

    /// Wait for any HTTP response on this path instead of a TCP accept.
    #[arg(long)]
    pub http_path: Option<String>,
}

fn parse_volume(s: &str) -> Result<VolumeBinding, String> {
    let (host, rest) = s
        .split_once(':')
        .ok_or_else(|| format!("expected HOST:CONTAINER[:ro], got `{s}`"))?;
    let (container, read_only) = match rest.strip_suffix(":ro") {
        Some(c) => (c, true),
        None => (rest, false),
    };
    let host_path = std::fs::canonicalize(host).unwrap_or_else(|_| PathBuf::from(host));
    Ok(VolumeBinding {
        host_path,
        container_path: container.to_string(),
        read_only,
    })
}

impl RunArgs {
    fn request(&self) -> packprobe_common::error::Result<RunRequest> {
        let mut builder = RunRequest::builder(ImageId::new(self.image.clone()));
        for (k, v) in &self.env {
            builder = builder.env(k.clone(), v.clone());
        }
        for &port in &self.publish {
            builder = builder.publish(PortBinding::auto(port));
        }
        if self.publish_all {
            builder = builder.publish_all();
        }
        for v in &self.volume {
            builder = builder.volume_binding(v.clone());
        }
        if let Some(network) = &self.network {
            builder = builder.network(network.clone());
        }
        builder.build()
    }

    fn liveness(&self) -> Liveness {
        self.http_path
            .as_ref()
            .map_or(Liveness::Tcp, |path| Liveness::Http { path: path.clone() })
    }
}

/// Executes the `run` command.
///
/// The container is stopped and removed when Ctrl+C is pressed, or right
/// away if it never becomes ready.
///
/// # Errors
///
/// Returns an error if the container fails to start or become ready.
pub fn execute(config: &ConfigArgs, args: RunArgs) -> anyhow::Result<()> {
    let harness = config.harness()?;
    let style = Style::stderr();
    let started = Instant::now();

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let report = harness.run_case(&args.image, |case| {
        let container = case.start(args.request()?)?;
        let ready = case.wait_until_ready(&container, &args.liveness())?;

        eprintln!();
        eprintln!(
            "  {GREEN}{BOLD}Ready{RESET} {} in {}",
            ready.container().id.short(),
            output::format_duration(started.elapsed())
        );
        for (container_port, host_port) in &ready.container().ports {
            eprintln!("  {CYAN}{container_port}{RESET} -> {BOLD}http://localhost:{host_port}{RESET}");
        }
        eprintln!();
        eprintln!("  Press {BOLD}Ctrl+C{RESET} to stop and remove the container...");

        while running.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(250));
        }
        eprintln!();
        eprintln!("  Stopping container...");
        Ok(())
    });

    eprint!("{}", output::render_report(&report, started.elapsed(), style));
    report.into_result()?;
    Ok(())
}
