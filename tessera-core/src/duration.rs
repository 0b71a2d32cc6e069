//! Elapsed time as reported in traces and outcomes.
//!
//! Serialized as a bare integer so `executionTimeMs` and each step's
//! `duration` read as plain millisecond counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whole milliseconds, saturating at `u64::MAX` and never negative.
///
/// ```
/// use std::time::Duration;
/// use tessera_core::DurationMs;
///
/// let step = DurationMs::from(Duration::from_micros(2_750));
/// assert_eq!(step.as_millis(), 2);
/// assert_eq!(serde_json::to_value(step).unwrap(), serde_json::json!(2));
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DurationMs(u64);

impl DurationMs {
    /// No time at all; a step that has not finished yet.
    pub const ZERO: Self = Self(0);

    /// From a millisecond count.
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// The millisecond count.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Wall-clock time from `start` to `end`. A clock that stepped
    /// backwards yields zero.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self(u64::try_from((end - start).num_milliseconds()).unwrap_or(0))
    }
}

impl From<Duration> for DurationMs {
    fn from(d: Duration) -> Self {
        Self(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

impl std::fmt::Display for DurationMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn between_clamps_backwards_clocks() {
        let start = Utc::now();
        let end = start + TimeDelta::milliseconds(1_250);
        assert_eq!(DurationMs::between(start, end).as_millis(), 1_250);
        assert_eq!(DurationMs::between(end, start), DurationMs::ZERO);
    }

    #[test]
    fn huge_std_durations_saturate() {
        assert_eq!(DurationMs::from(Duration::MAX).as_millis(), u64::MAX);
        assert_eq!(DurationMs::from_millis(40).to_string(), "40ms");
    }
}
