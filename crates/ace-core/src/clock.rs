//! Injectable time source.
//!
//! Learner decay, RepoMap recency signals, journal timestamps, and cache TTL
//! checks all read "now" through a [`Clock`] so that tests can pin time and
//! the pipeline stays deterministic under a fixed clock.

use chrono::{DateTime, SecondsFormat, Utc};

/// Time source used by every component that needs wall-clock time.
#[derive(Debug, Clone)]
pub enum Clock {
    /// Real system time.
    System,
    /// Frozen time at the given Unix epoch seconds (test hook).
    Fixed(u64),
}

impl Default for Clock {
    fn default() -> Self {
        Self::System
    }
}

impl Clock {
    /// Seconds since the Unix epoch.
    #[must_use]
    pub fn epoch_seconds(&self) -> u64 {
        match self {
            Self::System => {
                let now = Utc::now().timestamp();
                u64::try_from(now).unwrap_or(0)
            }
            Self::Fixed(seconds) => *seconds,
        }
    }

    /// ISO-8601 UTC timestamp with millisecond precision and `Z` suffix,
    /// e.g. `2026-08-01T12:30:00.000Z`.
    #[must_use]
    pub fn iso8601(&self) -> String {
        let instant: DateTime<Utc> = match self {
            Self::System => Utc::now(),
            Self::Fixed(seconds) => {
                let seconds = i64::try_from(*seconds).unwrap_or(0);
                DateTime::from_timestamp(seconds, 0).unwrap_or_default()
            }
        };
        instant.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Whole weeks elapsed between `earlier` and now, saturating at zero.
    ///
    /// Quantized to whole weeks so learner decay is deterministic whenever
    /// the clock is fixed.
    #[must_use]
    pub fn whole_weeks_since(&self, earlier: u64) -> u64 {
        const WEEK_SECONDS: u64 = 7 * 24 * 3600;
        self.epoch_seconds().saturating_sub(earlier) / WEEK_SECONDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_frozen() {
        let clock = Clock::Fixed(1_750_000_000);
        assert_eq!(clock.epoch_seconds(), 1_750_000_000);
        assert_eq!(clock.epoch_seconds(), 1_750_000_000);
    }

    #[test]
    fn fixed_clock_formats_iso8601_z() {
        let clock = Clock::Fixed(0);
        assert_eq!(clock.iso8601(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn whole_weeks_quantizes_down() {
        let clock = Clock::Fixed(1_000_000_000);
        let six_days_ago = 1_000_000_000 - 6 * 24 * 3600;
        let eight_days_ago = 1_000_000_000 - 8 * 24 * 3600;
        assert_eq!(clock.whole_weeks_since(six_days_ago), 0);
        assert_eq!(clock.whole_weeks_since(eight_days_ago), 1);
    }

    #[test]
    fn whole_weeks_saturates_for_future_stamps() {
        let clock = Clock::Fixed(100);
        assert_eq!(clock.whole_weeks_since(1_000_000), 0);
    }

    #[test]
    fn system_clock_advances_monotonically_enough() {
        let clock = Clock::System;
        let a = clock.epoch_seconds();
        let b = clock.epoch_seconds();
        assert!(b >= a);
    }
}
