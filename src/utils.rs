//! General utilities: the injectable clock.

use chrono::{DateTime, Utc};

/// Source of wall-clock time.
///
/// The clock only names manifest files; render output is independent of it.
/// Tests inject [`FixedClock`] for deterministic filenames.
pub trait Clock {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Format an instant for embedding in a manifest filename.
///
/// RFC 3339 UTC with `:` replaced by `-` so the result is a valid single
/// filename component on every filesystem. Lexicographic order of the
/// formatted strings is chronological, which manifest discovery relies on.
pub fn filename_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H-%M-%SZ").to_string()
}
