//! Formatted output helpers for CLI commands.
//!
//! Renders case reports and image metadata as plain text with optional
//! ANSI styling.

use std::fmt::Write as _;
use std::time::Duration;

use packprobe_common::error::PackprobeError;
use packprobe_image::descriptor::ImageDescriptor;
use packprobe_sdk::case::CaseReport;

pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const RED: &str = "\x1b[31m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";
pub const RESET: &str = "\x1b[0m";

/// ANSI styling, or none of it.
#[derive(Debug, Clone, Copy)]
pub struct Style {
    color: bool,
}

impl Style {
    /// Styling enabled or disabled.
    #[must_use]
    pub const fn new(color: bool) -> Self {
        Self { color }
    }

    /// Styles for stderr: colored unless `NO_COLOR` is set.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(std::env::var_os("NO_COLOR").is_none())
    }

    fn paint(self, code: &str, text: &str) -> String {
        if self.color {
            format!("{code}{text}{RESET}")
        } else {
            text.to_string()
        }
    }
}

/// Formats a duration as seconds with one decimal (e.g. "12.3s").
#[must_use]
pub fn format_duration(d: Duration) -> String {
    format!("{:.1}s", d.as_secs_f64())
}

/// Renders one case report: a verdict line, then failure detail and any
/// teardown errors, indented.
#[must_use]
pub fn render_report(report: &CaseReport, elapsed: Duration, style: Style) -> String {
    let mut out = String::new();
    let verdict = if report.passed() {
        style.paint(GREEN, "PASS")
    } else {
        style.paint(RED, "FAIL")
    };
    let _ = writeln!(
        out,
        "{verdict} {} {}",
        style.paint(BOLD, &report.label),
        style.paint(DIM, &format!("({}, {})", report.name, format_duration(elapsed)))
    );
    if let Err(e) = &report.verdict {
        for line in describe_failure(e).lines() {
            let _ = writeln!(out, "    {line}");
        }
        if !e.is_assertion() && !report.mismatches.is_empty() {
            let _ = writeln!(
                out,
                "    {} assertion(s) had already failed:",
                report.mismatches.len()
            );
            for m in &report.mismatches {
                let _ = writeln!(out, "      - {m}");
            }
        }
    }
    for e in &report.teardown_errors {
        let _ = writeln!(out, "    {} {e}", style.paint(YELLOW, "teardown:"));
    }
    out
}

/// Build failures end with the full transcript; show only its tail.
fn describe_failure(e: &PackprobeError) -> String {
    const TAIL: usize = 20;
    match e {
        PackprobeError::Build {
            image,
            message,
            transcript,
        } => {
            let lines = transcript.lines();
            let skip = lines.len().saturating_sub(TAIL);
            let mut text = format!("build of {image} failed: {message}");
            if skip > 0 {
                let _ = write!(text, "\n... {skip} earlier line(s)");
            }
            for line in &lines[skip..] {
                let _ = write!(text, "\n| {line}");
            }
            text
        }
        other => other.to_string(),
    }
}

/// Renders the applied buildpacks, their layers, and the image labels.
#[must_use]
pub fn render_descriptor(image: &ImageDescriptor, style: Style) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", style.paint(BOLD, &image.name), style.paint(DIM, image.id.as_str()));
    let _ = writeln!(out, "buildpacks:");
    for (i, bp) in image.buildpacks.iter().enumerate() {
        let _ = writeln!(out, "  [{i}] {}@{}", bp.key, bp.version);
        for (name, layer) in &bp.layers {
            let flags: Vec<&str> = [
                (layer.build, "build"),
                (layer.launch, "launch"),
                (layer.cache, "cache"),
            ]
            .iter()
            .filter_map(|&(on, flag)| on.then_some(flag))
            .collect();
            let _ = writeln!(out, "      {} [{}]", style.paint(CYAN, name), flags.join(","));
            for (key, value) in &layer.metadata {
                let _ = writeln!(out, "        {key} = {value}");
            }
        }
    }
    if !image.labels.is_empty() {
        let _ = writeln!(out, "labels:");
        for (k, v) in &image.labels {
            let _ = writeln!(out, "  {k}={v}");
        }
    }
    out
}
