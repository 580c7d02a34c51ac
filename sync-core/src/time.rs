//! UTC time keeping for the master and calendar helpers.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// UTC seconds at 2017-01-01. Anything earlier is not a real clock.
pub const TIME_UTC_2017: u32 = 1_483_228_800;

const SECONDS_PER_DAY: u32 = 86_400;

/// Where the master takes its time from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtcClock {
    /// The operating system clock
    System,
    /// Set from an external source and extrapolated locally
    Manual {
        /// Last synchronised UTC seconds, if any
        synced: Option<(u32, Instant)>,
    },
}

impl UtcClock {
    /// Unsynchronised manual clock.
    pub fn manual() -> Self {
        Self::Manual { synced: None }
    }

    /// Synchronise a manual clock. Implausible values are ignored.
    pub fn set(&mut self, utc_seconds: u32, now: Instant) -> bool {
        match self {
            Self::Manual { synced } if utc_seconds > TIME_UTC_2017 => {
                *synced = Some((utc_seconds, now));
                true
            }
            _ => false,
        }
    }

    /// Current UTC seconds, 0 if unknown.
    pub fn now_utc(&self, now: Instant) -> u32 {
        match *self {
            Self::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0),
            Self::Manual { synced: Some((utc, at)) } => {
                utc.wrapping_add(now.saturating_duration_since(at).as_secs() as u32)
            }
            Self::Manual { synced: None } => 0,
        }
    }

    /// Whether the clock shows a plausible time.
    pub fn is_synced(&self, now: Instant) -> bool {
        self.now_utc(now) > TIME_UTC_2017
    }

    /// Whether a manual sync happened within `limit`. The system clock always counts as synced.
    pub fn was_synced_within(&self, limit: Duration, now: Instant) -> bool {
        match *self {
            Self::System => self.is_synced(now),
            Self::Manual { synced: Some((_, at)) } => now.saturating_duration_since(at) <= limit,
            Self::Manual { synced: None } => false,
        }
    }
}

/// Day of week, 0 = Monday.
pub fn week_day(utc_seconds: u32) -> u8 {
    ((utc_seconds / SECONDS_PER_DAY + 3) % 7) as u8
}

/// Seconds since UTC midnight.
pub fn second_of_day(utc_seconds: u32) -> u32 {
    utc_seconds % SECONDS_PER_DAY
}

/// Minutes since UTC midnight.
pub fn minute_of_day(utc_seconds: u32) -> u16 {
    (second_of_day(utc_seconds) / 60) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_extrapolates() {
        let now = Instant::now();
        let mut clock = UtcClock::manual();
        assert!(!clock.is_synced(now));
        assert_eq!(clock.now_utc(now), 0);

        assert!(clock.set(TIME_UTC_2017 + 100, now));
        assert!(clock.is_synced(now));
        assert_eq!(clock.now_utc(now + Duration::from_secs(5)), TIME_UTC_2017 + 105);
        assert!(clock.was_synced_within(Duration::from_secs(10), now + Duration::from_secs(5)));
        assert!(!clock.was_synced_within(Duration::from_secs(1), now + Duration::from_secs(5)));
    }

    #[test]
    fn manual_clock_rejects_implausible_time() {
        let now = Instant::now();
        let mut clock = UtcClock::manual();
        assert!(!clock.set(TIME_UTC_2017, now));
        assert!(!clock.is_synced(now));
    }

    #[test]
    fn system_clock_is_synced() {
        let mut clock = UtcClock::System;
        let now = Instant::now();
        assert!(clock.is_synced(now));
        assert!(!clock.set(TIME_UTC_2017 + 1, now));
    }

    #[test]
    fn calendar_helpers() {
        // 2017-01-01 was a Sunday.
        assert_eq!(week_day(TIME_UTC_2017), 6);
        assert_eq!(week_day(TIME_UTC_2017 + SECONDS_PER_DAY), 0);
        assert_eq!(minute_of_day(TIME_UTC_2017 + 3_661), 61);
        assert_eq!(second_of_day(TIME_UTC_2017 + 42), 42);
    }
}
