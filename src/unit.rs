use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Granularity a timeout budget is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Number of nanoseconds in one unit
    pub const fn nanos_per_unit(self) -> u128 {
        match self {
            Self::Nanoseconds => 1,
            Self::Microseconds => 1_000,
            Self::Milliseconds => 1_000_000,
            Self::Seconds => 1_000_000_000,
            Self::Minutes => 60 * 1_000_000_000,
            Self::Hours => 60 * 60 * 1_000_000_000,
            Self::Days => 24 * 60 * 60 * 1_000_000_000,
        }
    }

    /// Normalize `amount` to nanoseconds.
    ///
    /// Never overflows: the largest product (`u64::MAX` days) fits in a `u128`.
    pub const fn to_nanos(self, amount: u64) -> u128 {
        amount as u128 * self.nanos_per_unit()
    }

    /// Normalize `amount` to milliseconds, truncating anything below one millisecond.
    pub const fn to_millis(self, amount: u64) -> u128 {
        self.to_nanos(amount) / 1_000_000
    }

    /// Convert `amount` into a concrete wait.
    ///
    /// Returns `None` when the value does not fit a `Duration`.
    pub fn to_duration(self, amount: u64) -> Option<Duration> {
        let nanos = self.to_nanos(amount);
        let secs = u64::try_from(nanos / 1_000_000_000).ok()?;
        let subsec = (nanos % 1_000_000_000) as u32;
        Some(Duration::new(secs, subsec))
    }

    /// Lowercase plural name, as used in failure messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nanoseconds => "nanoseconds",
            Self::Microseconds => "microseconds",
            Self::Milliseconds => "milliseconds",
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
        }
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_every_unit() {
        assert_eq!(TimeUnit::Nanoseconds.to_nanos(7), 7);
        assert_eq!(TimeUnit::Microseconds.to_millis(2_500), 2);
        assert_eq!(TimeUnit::Milliseconds.to_millis(100), 100);
        assert_eq!(TimeUnit::Seconds.to_millis(3), 3_000);
        assert_eq!(TimeUnit::Minutes.to_millis(2), 120_000);
        assert_eq!(TimeUnit::Hours.to_millis(1), 3_600_000);
        assert_eq!(TimeUnit::Days.to_millis(1), 86_400_000);
    }

    #[test]
    fn largest_amount_does_not_overflow() {
        let nanos = TimeUnit::Days.to_nanos(u64::MAX);
        assert_eq!(nanos, u64::MAX as u128 * 86_400_000_000_000);
    }

    #[test]
    fn converts_to_duration() {
        assert_eq!(
            TimeUnit::Milliseconds.to_duration(1_500),
            Some(Duration::from_millis(1_500))
        );
        assert_eq!(
            TimeUnit::Nanoseconds.to_duration(u64::MAX),
            Some(Duration::from_nanos(u64::MAX))
        );
        assert_eq!(
            TimeUnit::Seconds.to_duration(u64::MAX),
            Some(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn unrepresentable_duration_is_none() {
        assert_eq!(TimeUnit::Days.to_duration(u64::MAX), None);
        assert_eq!(TimeUnit::Minutes.to_duration(u64::MAX), None);
    }

    #[test]
    fn displays_plural_name() {
        assert_eq!(TimeUnit::Milliseconds.to_string(), "milliseconds");
        assert_eq!(TimeUnit::Days.to_string(), "days");
    }
}
