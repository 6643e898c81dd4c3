//! Time ranges and refresh windows.
//!
//! All timestamps are whole seconds since the Unix epoch, matching the wire
//! format.

use serde::{Deserialize, Serialize};

use crate::SECONDS_PER_DAY;

/// Half-open interval `[from, to)` in epoch seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start.
    pub from: u64,
    /// Exclusive end.
    pub to: u64,
}

impl TimeRange {
    /// Build a range; callers are expected to pass `from <= to`.
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Whether `instant` falls inside the range.
    pub fn contains(&self, instant: u64) -> bool {
        instant >= self.from && instant < self.to
    }

    /// Whether the range covers no instants.
    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }
}

/// Error building a [`TimeWindow`] with an out-of-order refresh instant.
#[derive(Debug, thiserror::Error)]
#[error("time window must satisfy from < refresh < to (from={from}, refresh={refresh}, to={to})")]
pub struct TimeWindowError {
    pub from: u64,
    pub refresh: u64,
    pub to: u64,
}

/// A sync window `[from, to)` with the instant at which it must be renewed.
///
/// Invariant: `from < refresh < to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    from: u64,
    to: u64,
    refresh: u64,
}

impl TimeWindow {
    /// Build a window, validating the ordering invariant.
    pub fn new(from: u64, to: u64, refresh: u64) -> Result<Self, TimeWindowError> {
        if from < refresh && refresh < to {
            Ok(Self { from, to, refresh })
        } else {
            Err(TimeWindowError { from, refresh, to })
        }
    }

    /// Default policy: whole-day-aligned window of `days` UTC days starting
    /// at the beginning of the current UTC day, refreshing at the end of the
    /// current UTC day. Requires `days >= 2` so that `refresh < to`.
    pub fn whole_days(now: u64, days: u32) -> Result<Self, TimeWindowError> {
        let from = now - now % SECONDS_PER_DAY;
        let refresh = from + SECONDS_PER_DAY;
        let to = from + u64::from(days) * SECONDS_PER_DAY;
        Self::new(from, to, refresh)
    }

    /// The covered range `[from, to)`.
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.from, self.to)
    }

    /// Inclusive start.
    pub fn from(&self) -> u64 {
        self.from
    }

    /// Exclusive end.
    pub fn to(&self) -> u64 {
        self.to
    }

    /// Instant at which a fresh window must be requested.
    pub fn refresh(&self) -> u64 {
        self.refresh
    }
}
