//! Fixed windows and the limit bound to a limiter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Named window lengths accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }
}

/// Maximum units allowed per fixed window.
///
/// Bound to a limiter at construction. Replacing a limit swaps the whole
/// value; the fields are never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitConfig {
    /// Maximum units allowed in one window
    pub max_count: u64,
    /// Length of one window
    pub window: Duration,
    /// Name used in logs
    pub name: Option<String>,
}

impl LimitConfig {
    /// Create a limit of `max_count` units per `window`.
    pub fn new(max_count: u64, window: Duration) -> Self {
        Self {
            max_count,
            window,
            name: None,
        }
    }

    /// Create a limit of `max_count` units per named window.
    pub fn per(max_count: u64, window: TimeWindow) -> Self {
        Self::new(max_count, window.duration())
    }

    /// Attach a name to this limit.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Window length in whole milliseconds, never less than one.
    pub fn window_millis(&self) -> u64 {
        (self.window.as_millis() as u64).max(1)
    }

    /// Start of the epoch-aligned window containing `now_millis`.
    pub fn window_start_millis(&self, now_millis: u64) -> u64 {
        let window = self.window_millis();
        (now_millis / window) * window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_window_duration() {
        assert_eq!(TimeWindow::Second.duration(), Duration::from_secs(1));
        assert_eq!(TimeWindow::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeWindow::Hour.duration(), Duration::from_secs(3600));
        assert_eq!(TimeWindow::Day.duration(), Duration::from_secs(86400));
    }

    #[test]
    fn test_window_start_is_floored() {
        let limit = LimitConfig::per(10, TimeWindow::Minute);

        assert_eq!(limit.window_start_millis(0), 0);
        assert_eq!(limit.window_start_millis(59_999), 0);
        assert_eq!(limit.window_start_millis(60_000), 60_000);
        assert_eq!(limit.window_start_millis(1_704_067_215_000), 1_704_067_200_000);
    }

    #[test]
    fn test_sub_millisecond_window_is_clamped() {
        let limit = LimitConfig::new(1, Duration::from_micros(10));
        assert_eq!(limit.window_millis(), 1);
    }

    #[test]
    fn test_time_window_deserializes_lowercase() {
        let unit: TimeWindow = serde_yaml::from_str("minute").unwrap();
        assert_eq!(unit, TimeWindow::Minute);
    }
}
