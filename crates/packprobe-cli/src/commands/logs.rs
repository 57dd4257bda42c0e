//! `packprobe logs` — Print container logs.

use clap::Args;
use packprobe_common::types::ContainerId;
use packprobe_runtime::logs::LogCursor;

use crate::commands::ConfigArgs;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container ID or name.
    pub container: String,

    /// Only output printed after this RFC 3339 timestamp.
    #[arg(long, value_parser = parse_cursor)]
    pub since: Option<LogCursor>,
}

fn parse_cursor(s: &str) -> Result<LogCursor, String> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| LogCursor::at(t.with_timezone(&chrono::Utc)))
        .map_err(|e| format!("invalid timestamp `{s}`: {e}"))
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container is not found or logs are unavailable.
pub fn execute(config: &ConfigArgs, args: &LogsArgs) -> anyhow::Result<()> {
    let harness = config.harness()?;
    let id = ContainerId::new(args.container.clone());
    let logs = harness.runtime().logs_since(&id, args.since.as_ref())?;

    if logs.is_empty() {
        eprintln!("No logs available for container: {}", args.container);
    } else {
        print!("{logs}");
    }
    Ok(())
}
