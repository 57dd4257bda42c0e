//! Expectation checks for build transcripts, image metadata, and probes.
//!
//! The `check_*` functions are pure comparisons returning a [`Mismatch`]
//! with expected and actual values. [`Expectations`] is the per-case
//! context that runs them and keeps every failure, so one run reports all
//! mismatches at once.

use packprobe_common::error::{Mismatch, PackprobeError, Result};
use packprobe_common::poll::{self, PollPolicy};
use packprobe_common::types::{ContainerId, LogTranscript};
use packprobe_image::descriptor::ImageDescriptor;
use packprobe_runtime::backend::ContainerRuntime;
use packprobe_runtime::logs::LogCursor;

use crate::probe::ProbeResult;

/// Longest excerpt of actual output quoted in a mismatch.
const EXCERPT_LIMIT: usize = 2_000;

fn excerpt(text: &str) -> String {
    if text.len() <= EXCERPT_LIMIT {
        return format!("{text:?}");
    }
    let mut cut = EXCERPT_LIMIT;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{:?}... ({} bytes total)", &text[..cut], text.len())
}

/// Checks that every needle appears in some line of `transcript`, in any order.
///
/// # Errors
///
/// Returns a mismatch listing the needles that were not found.
pub fn check_contains_lines(
    subject: &str,
    transcript: &LogTranscript,
    needles: &[&str],
) -> std::result::Result<(), Mismatch> {
    let missing: Vec<&str> = needles
        .iter()
        .copied()
        .filter(|n| !transcript.contains_line(n))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Mismatch::new(
            subject,
            format!("lines containing {missing:?}"),
            excerpt(&transcript.to_string()),
        ))
    }
}

/// Checks that the needles appear on lines in the given order.
///
/// # Errors
///
/// Returns a mismatch naming the first needle not found after its predecessor.
pub fn check_contains_lines_in_order(
    subject: &str,
    transcript: &LogTranscript,
    needles: &[&str],
) -> std::result::Result<(), Mismatch> {
    let mut from = 0;
    for needle in needles {
        match transcript.position_of(needle, from) {
            Some(idx) => from = idx + 1,
            None => {
                return Err(Mismatch::new(
                    subject,
                    format!("a line containing {needle:?} after line {from} (order {needles:?})"),
                    excerpt(&transcript.to_string()),
                ));
            }
        }
    }
    Ok(())
}

/// Checks the key of the buildpack at `index` in execution order.
///
/// # Errors
///
/// Returns a mismatch if the index is out of range or the key differs.
pub fn check_buildpack_key(
    image: &ImageDescriptor,
    index: usize,
    expected: &str,
) -> std::result::Result<(), Mismatch> {
    let subject = format!("buildpack[{index}].key");
    match image.buildpack(index) {
        Some(bp) if bp.key == expected => Ok(()),
        Some(bp) => Err(Mismatch::new(subject, format!("{expected:?}"), format!("{:?}", bp.key))),
        None => Err(Mismatch::new(
            subject,
            format!("{expected:?}"),
            format!("only {} buildpack(s) applied", image.buildpacks.len()),
        )),
    }
}

/// Checks one metadata entry of a layer contributed by the buildpack at `index`.
///
/// # Errors
///
/// Returns a mismatch if the buildpack, layer, or key is missing, or the
/// value differs.
pub fn check_layer_metadata(
    image: &ImageDescriptor,
    index: usize,
    layer: &str,
    key: &str,
    expected: &serde_json::Value,
) -> std::result::Result<(), Mismatch> {
    let subject = format!("buildpack[{index}].layers[{layer:?}].metadata[{key:?}]");
    let actual = image
        .buildpack(index)
        .ok_or_else(|| format!("only {} buildpack(s) applied", image.buildpacks.len()))
        .and_then(|bp| {
            bp.layers.get(layer).ok_or_else(|| {
                format!(
                    "{} has layers {:?}",
                    bp.key,
                    bp.layers.keys().collect::<Vec<_>>()
                )
            })
        })
        .and_then(|l| {
            l.metadata
                .get(key)
                .ok_or_else(|| format!("metadata keys {:?}", l.metadata.keys().collect::<Vec<_>>()))
        });
    match actual {
        Ok(value) if value == expected => Ok(()),
        Ok(value) => Err(Mismatch::new(subject, expected.to_string(), value.to_string())),
        Err(why) => Err(Mismatch::new(subject, expected.to_string(), why)),
    }
}

/// Checks an image label.
///
/// # Errors
///
/// Returns a mismatch if the label is missing or differs.
pub fn check_label(
    image: &ImageDescriptor,
    key: &str,
    expected: &str,
) -> std::result::Result<(), Mismatch> {
    match image.label(key) {
        Some(v) if v == expected => Ok(()),
        Some(v) => Err(Mismatch::new(format!("label {key:?}"), format!("{expected:?}"), format!("{v:?}"))),
        None => Err(Mismatch::new(format!("label {key:?}"), format!("{expected:?}"), "no such label")),
    }
}

/// Checks a probe's status code.
///
/// # Errors
///
/// Returns a mismatch if the status differs.
pub fn check_status(result: &ProbeResult, expected: u16) -> std::result::Result<(), Mismatch> {
    if result.status == expected {
        Ok(())
    } else {
        Err(Mismatch::new(
            format!("status of {}", result.url),
            expected.to_string(),
            format!("{} with body {}", result.status, excerpt(&result.text())),
        ))
    }
}

/// Checks that a probe's body contains `needle`.
///
/// # Errors
///
/// Returns a mismatch if the body does not contain it.
pub fn check_body_contains(result: &ProbeResult, needle: &str) -> std::result::Result<(), Mismatch> {
    let body = result.text();
    if body.contains(needle) {
        Ok(())
    } else {
        Err(Mismatch::new(
            format!("body of {}", result.url),
            format!("to contain {needle:?}"),
            excerpt(&body),
        ))
    }
}

/// Per-case assertion context.
///
/// Each case owns one context with its own poll policy; nothing is shared
/// between cases.
#[derive(Debug)]
pub struct Expectations {
    case: String,
    policy: PollPolicy,
    failures: Vec<Mismatch>,
}

impl Expectations {
    /// Creates an empty context for `case`, polling eventual checks under `policy`.
    #[must_use]
    pub fn new(case: impl Into<String>, policy: PollPolicy) -> Self {
        Self {
            case: case.into(),
            policy,
            failures: Vec::new(),
        }
    }

    /// Records the outcome of a check.
    pub fn record(&mut self, outcome: std::result::Result<(), Mismatch>) {
        if let Err(m) = outcome {
            tracing::warn!(case = %self.case, mismatch = %m, "expectation failed");
            self.failures.push(m);
        }
    }

    /// Expects every needle on some line of the build log.
    pub fn log_contains_lines(&mut self, transcript: &LogTranscript, needles: &[&str]) {
        self.record(check_contains_lines("build log", transcript, needles));
    }

    /// Expects the needles on lines of the build log in order.
    pub fn log_contains_lines_in_order(&mut self, transcript: &LogTranscript, needles: &[&str]) {
        self.record(check_contains_lines_in_order("build log", transcript, needles));
    }

    /// Expects the buildpack at `index` to have `key`.
    pub fn buildpack_key(&mut self, image: &ImageDescriptor, index: usize, key: &str) {
        self.record(check_buildpack_key(image, index, key));
    }

    /// Expects a layer metadata entry of the buildpack at `index`.
    pub fn layer_metadata(
        &mut self,
        image: &ImageDescriptor,
        index: usize,
        layer: &str,
        key: &str,
        expected: &serde_json::Value,
    ) {
        self.record(check_layer_metadata(image, index, layer, key, expected));
    }

    /// Expects an image label.
    pub fn label(&mut self, image: &ImageDescriptor, key: &str, expected: &str) {
        self.record(check_label(image, key, expected));
    }

    /// Expects a probe status code.
    pub fn status(&mut self, result: &ProbeResult, expected: u16) {
        self.record(check_status(result, expected));
    }

    /// Expects a probe body to contain `needle`.
    pub fn body_contains(&mut self, result: &ProbeResult, needle: &str) {
        self.record(check_body_contains(result, needle));
    }

    /// Polls the container log until it contains `needle` or the context's
    /// deadline passes.
    ///
    /// A failure to read the log counts as "not yet"; only the timeout is
    /// recorded.
    pub fn eventually_log_contains(
        &mut self,
        runtime: &dyn ContainerRuntime,
        container: &ContainerId,
        since: Option<&LogCursor>,
        needle: &str,
    ) -> bool {
        let outcome = poll::until(self.policy, || {
            let logs = runtime
                .logs_since(container, since)
                .map_err(|e| e.to_string())?;
            if logs.contains_line(needle) {
                Ok(())
            } else {
                Err(logs.to_string())
            }
        });
        let passed = outcome.is_ok();
        self.record(outcome.map_err(|elapsed| {
            Mismatch::new(
                format!("container {} log", container.short()),
                format!("to contain {needle:?} within {:?}", self.policy.timeout),
                excerpt(&elapsed.last_error),
            )
        }));
        passed
    }

    /// Returns the mismatches recorded so far.
    #[must_use]
    pub fn failures(&self) -> &[Mismatch] {
        &self.failures
    }

    /// Returns `true` if nothing has failed yet.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converts the recorded mismatches into a verdict.
    ///
    /// # Errors
    ///
    /// Returns `Assertion` with every mismatch if any check failed.
    pub fn finish(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(PackprobeError::Assertion(self.failures))
        }
    }
}
