//! Race clock and the time-driven race status thresholds.

use shared::RaceStatus;

/// Warning starts this long before the scheduled start
pub const WARNING_THRESHOLD_MS: i64 = 3 * 60 * 1000;
/// Preparatory starts this long before the scheduled start
pub const PREPARATORY_THRESHOLD_MS: i64 = 60 * 1000;

/// Status implied by the time remaining until the start
pub fn status_for(time_to_start_ms: i64) -> RaceStatus {
    if time_to_start_ms > WARNING_THRESHOLD_MS {
        RaceStatus::Prestart
    } else if time_to_start_ms > PREPARATORY_THRESHOLD_MS {
        RaceStatus::Warning
    } else if time_to_start_ms > 0 {
        RaceStatus::Preparatory
    } else {
        RaceStatus::Started
    }
}

/// Wall-clock time of the race relative to its scheduled start.
///
/// All times are milliseconds since the unix epoch. The current time only
/// moves when the driver loop calls [`RaceClock::set_time`], so every boat
/// processed in one tick sees the same race time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceClock {
    start_time: i64,
    current_time: i64,
}

impl RaceClock {
    pub fn new(start_time: i64, current_time: i64) -> Self {
        Self {
            start_time,
            current_time,
        }
    }

    pub fn set_time(&mut self, now_ms: i64) {
        self.current_time = now_ms;
    }

    pub fn set_start_time(&mut self, start_time: i64) {
        self.start_time = start_time;
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn current_time(&self) -> i64 {
        self.current_time
    }

    /// Negative before the start
    pub fn duration_ms(&self) -> i64 {
        self.current_time - self.start_time
    }

    pub fn time_to_start_ms(&self) -> i64 {
        self.start_time - self.current_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_thresholds() {
        assert_eq!(status_for(10 * 60 * 1000), RaceStatus::Prestart);
        assert_eq!(status_for(180_001), RaceStatus::Prestart);
        assert_eq!(status_for(180_000), RaceStatus::Warning);
        assert_eq!(status_for(60_001), RaceStatus::Warning);
        assert_eq!(status_for(60_000), RaceStatus::Preparatory);
        assert_eq!(status_for(1), RaceStatus::Preparatory);
        assert_eq!(status_for(0), RaceStatus::Started);
        assert_eq!(status_for(-5_000), RaceStatus::Started);
    }

    #[test]
    fn test_clock_durations() {
        let mut clock = RaceClock::new(1_000_000, 900_000);
        assert_eq!(clock.time_to_start_ms(), 100_000);
        assert_eq!(clock.duration_ms(), -100_000);

        clock.set_time(1_250_000);
        assert_eq!(clock.duration_ms(), 250_000);
        assert_eq!(clock.current_time(), 1_250_000);
    }
}
