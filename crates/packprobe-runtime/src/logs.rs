//! Container log cursors.
//!
//! A cursor marks a point in time; reading logs "since" a cursor returns
//! only what the container printed after it. Cursors let a case ignore
//! output from earlier phases when waiting for a specific line.

use chrono::{DateTime, SecondsFormat, Utc};

/// A position in a container's log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogCursor(DateTime<Utc>);

impl LogCursor {
    /// Returns a cursor at the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns a cursor at a specific instant.
    #[must_use]
    pub const fn at(instant: DateTime<Utc>) -> Self {
        Self(instant)
    }

    /// Returns the underlying instant.
    #[must_use]
    pub const fn instant(&self) -> DateTime<Utc> {
        self.0
    }

    /// Formats the cursor for `docker logs --since`.
    #[must_use]
    pub fn to_since_arg(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }
}
