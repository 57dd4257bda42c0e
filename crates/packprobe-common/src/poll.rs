//! Bounded poll-until-success loop.
//!
//! Readiness checks, eventual container-log checks, and mutual-TLS probe
//! retries all share this loop: a fixed interval, an explicit deadline, and
//! a timeout reported separately from the check's own failure.

use std::fmt;
use std::time::{Duration, Instant};

/// Interval and deadline for a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause between consecutive attempts.
    pub interval: Duration,
    /// Total time after which the loop gives up.
    pub timeout: Duration,
}

impl PollPolicy {
    /// Creates a policy with the given interval and timeout.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Returns a copy of this policy with a different timeout.
    #[must_use]
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            interval: self.interval,
            timeout,
        }
    }
}

/// The deadline passed before a check succeeded.
#[derive(Debug)]
pub struct Elapsed<E> {
    /// Time spent polling.
    pub waited: Duration,
    /// Number of attempts made.
    pub attempts: u32,
    /// Failure returned by the final attempt.
    pub last_error: E,
}

impl<E: fmt::Display> fmt::Display for Elapsed<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gave up after {:?} and {} attempt(s): {}",
            self.waited, self.attempts, self.last_error
        )
    }
}

/// Runs `check` until it returns `Ok` or `policy.timeout` elapses.
///
/// The check always runs at least once, so a zero timeout means a single
/// attempt. The last attempt happens at the deadline rather than one full
/// interval before it.
///
/// # Errors
///
/// Returns [`Elapsed`] carrying the final attempt's error when the deadline
/// passes without success.
pub fn until<T, E>(
    policy: PollPolicy,
    mut check: impl FnMut() -> Result<T, E>,
) -> Result<T, Elapsed<E>> {
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts = attempts.saturating_add(1);
        match check() {
            Ok(value) => {
                tracing::debug!(attempts, waited = ?start.elapsed(), "poll succeeded");
                return Ok(value);
            }
            Err(last_error) => {
                let waited = start.elapsed();
                if waited >= policy.timeout {
                    return Err(Elapsed {
                        waited,
                        attempts,
                        last_error,
                    });
                }
                tracing::trace!(attempts, "poll attempt pending");
                std::thread::sleep(policy.interval.min(policy.timeout - waited));
            }
        }
    }
}
