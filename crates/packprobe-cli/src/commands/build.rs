//! `packprobe build` — Build a fixture and print the image metadata.

use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use packprobe_common::types::PullPolicy;
use packprobe_image::descriptor::BuildResult;
use packprobe_image::request::BuildRequest;

use crate::commands::{ConfigArgs, parse_key_value};
use crate::output::{self, Style};

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Fixture name under the fixture root.
    pub fixture: String,

    /// Subdirectory of the fixture to build.
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Buildpack coordinate; repeat in execution order.
    #[arg(short, long = "buildpack", required = true)]
    pub buildpacks: Vec<String>,

    /// Build-time environment variable.
    #[arg(short, long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Image label.
    #[arg(short, long, value_parser = parse_key_value)]
    pub label: Vec<(String, String)>,

    /// Builder and run image pull policy.
    #[arg(long, default_value = "never")]
    pub pull_policy: PullPolicy,

    /// Print the image metadata as JSON.
    #[arg(long)]
    pub json: bool,

    /// Print the full build transcript.
    #[arg(long)]
    pub show_log: bool,
}

impl BuildArgs {
    fn request(&self, root: PathBuf, no_color: bool) -> packprobe_common::error::Result<BuildRequest> {
        let source = match &self.source {
            Some(sub) => root.join(sub),
            None => root,
        };
        let mut builder = BuildRequest::builder(source)
            .buildpacks(self.buildpacks.iter().cloned())
            .pull_policy(self.pull_policy)
            .no_color(no_color);
        for (k, v) in &self.env {
            builder = builder.env(k.clone(), v.clone());
        }
        for (k, v) in &self.label {
            builder = builder.label(k.clone(), v.clone());
        }
        builder.build()
    }
}

/// Executes the `build` command.
///
/// The image is removed afterwards unless `--keep-image` is given.
///
/// # Errors
///
/// Returns an error if the fixture is missing or the build fails.
pub fn execute(config: &ConfigArgs, args: BuildArgs) -> anyhow::Result<()> {
    let harness = config.harness()?;
    let style = Style::stderr();
    let started = Instant::now();
    let mut built: Option<BuildResult> = None;

    let report = harness.run_case(&args.fixture, |case| {
        let root = case.fixture(&args.fixture)?.path().to_path_buf();
        let request = args.request(root, case.config().no_color)?;
        built = Some(case.build(request)?);
        Ok(())
    });

    if let Some(result) = &built {
        if args.show_log {
            eprint!("{}", result.transcript);
        }
        if args.json {
            println!("{}", serde_json::to_string_pretty(&result.image)?);
        } else {
            print!("{}", output::render_descriptor(&result.image, style));
        }
    }
    eprint!("{}", output::render_report(&report, started.elapsed(), style));
    if harness.config().keep_image {
        eprintln!("kept image {}", report.name);
    }
    report.into_result()?;
    Ok(())
}
