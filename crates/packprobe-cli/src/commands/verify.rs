//! `packprobe verify` — Run scenario files and report each verdict.

use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use packprobe_sdk::scenario::Scenario;

use crate::commands::ConfigArgs;
use crate::output::{self, Style};

/// Arguments for the `verify` command.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Scenario files to run, in order.
    #[arg(required = true)]
    pub scenarios: Vec<PathBuf>,

    /// Stop after the first failing scenario.
    #[arg(long)]
    pub fail_fast: bool,
}

/// Executes the `verify` command.
///
/// All scenarios are parsed before any of them runs.
///
/// # Errors
///
/// Returns an error if a scenario file is invalid or any scenario fails.
pub fn execute(config: &ConfigArgs, args: VerifyArgs) -> anyhow::Result<()> {
    let scenarios = args
        .scenarios
        .iter()
        .map(|path| {
            Scenario::from_file(path)
                .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let harness = config.harness()?;
    let style = Style::stderr();
    let mut failed = 0usize;
    let mut ran = 0usize;

    for scenario in &scenarios {
        let started = Instant::now();
        let report = scenario.run(&harness);
        ran += 1;
        eprint!("{}", output::render_report(&report, started.elapsed(), style));
        if !report.passed() {
            failed += 1;
            if args.fail_fast {
                break;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {ran} scenario(s) failed");
    }
    eprintln!("{ran} scenario(s) passed");
    Ok(())
}
