//! `packprobe clean` — Remove an image and its build cache volumes.

use clap::Args;
use packprobe_common::types::ImageId;
use packprobe_image::cache::cache_volume_names;

use crate::commands::ConfigArgs;

/// Arguments for the `clean` command.
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Image name used for the build (e.g. `packprobe-<uuid>`).
    pub name: String,

    /// Keep the image; only remove the cache volumes.
    #[arg(long)]
    pub volumes_only: bool,
}

/// Executes the `clean` command.
///
/// Removing an image or volume that does not exist is not an error.
///
/// # Errors
///
/// Returns an error if the runtime refuses a removal.
pub fn execute(config: &ConfigArgs, args: &CleanArgs) -> anyhow::Result<()> {
    let harness = config.harness()?;
    let runtime = harness.runtime();

    if !args.volumes_only {
        runtime.remove_image(&ImageId::new(args.name.clone()))?;
    }
    let volumes = cache_volume_names(&args.name);
    runtime.remove_volumes(&volumes)?;

    tracing::info!(image = %args.name, volumes = ?volumes, "cleaned");
    for v in &volumes {
        eprintln!("removed volume {v}");
    }
    Ok(())
}
