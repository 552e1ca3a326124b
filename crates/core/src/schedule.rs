//! Schedule expressions for backup rules.
//!
//! A rule's schedule is one of:
//!
//! - a preset: `hourly`, `daily`, `weekly` (Sunday midnight) or `monthly`
//!   (first of the month at midnight),
//! - a fixed interval: `every 30m`, `every 6h`, `every 1d`,
//! - a five-field cron expression such as `30 2 * * MON-FRI`.
//!
//! Presets and cron expressions are evaluated in the rule's timezone.
//! Intervals are aligned to the Unix epoch so every process computes the same
//! boundaries.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::ValidationError;

/// Shortest interval accepted for `every <n><unit>` schedules.
pub const MIN_INTERVAL: Duration = Duration::from_secs(60);

static INTERVAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@?every\s+(\d+)\s*([smhd])$").expect("interval regex is valid")
});

/// A parsed schedule expression.
pub enum Schedule {
    /// Calendar schedule evaluated in a timezone.
    Cron {
        expression: String,
        cron: croner::Cron,
        tz: chrono_tz::Tz,
    },
    /// Fixed-period schedule aligned to the epoch.
    Interval { every: Duration },
}

impl Schedule {
    /// Parse a schedule expression evaluated in `timezone`.
    pub fn parse(expression: &str, timezone: &str) -> Result<Self, ValidationError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty { field: "schedule" });
        }
        let lowered = trimmed.to_ascii_lowercase();
        let tz = parse_timezone(timezone)?;

        if let Some(caps) = INTERVAL_RE.captures(&lowered) {
            let amount: u64 = caps[1].parse().map_err(|_| ValidationError::Schedule {
                value: trimmed.to_owned(),
                reason: "interval amount is out of range".to_owned(),
            })?;
            let unit = match &caps[2] {
                "s" => 1,
                "m" => 60,
                "h" => 3_600,
                _ => 86_400,
            };
            let secs = amount.checked_mul(unit).ok_or_else(|| ValidationError::Schedule {
                value: trimmed.to_owned(),
                reason: "interval amount is out of range".to_owned(),
            })?;
            let every = Duration::from_secs(secs);
            if every < MIN_INTERVAL {
                return Err(ValidationError::Schedule {
                    value: trimmed.to_owned(),
                    reason: format!("interval must be at least {}s", MIN_INTERVAL.as_secs()),
                });
            }
            return Ok(Self::Interval { every });
        }

        let cron_expr = match lowered.as_str() {
            "hourly" | "@hourly" => "0 * * * *",
            "daily" | "@daily" => "0 0 * * *",
            "weekly" | "@weekly" => "0 0 * * SUN",
            "monthly" | "@monthly" => "0 0 1 * *",
            _ => trimmed,
        };
        let cron = croner::Cron::new(cron_expr)
            .parse()
            .map_err(|e| ValidationError::Schedule {
                value: trimmed.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(Self::Cron {
            expression: trimmed.to_owned(),
            cron,
            tz,
        })
    }

    /// The next fire time strictly after `after`.
    ///
    /// Returns `None` when the expression has no future occurrence.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron { cron, tz, .. } => {
                let after_tz = after.with_timezone(tz);
                cron.find_next_occurrence(&after_tz, false)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
            Self::Interval { every } => {
                let period = i64::try_from(every.as_secs()).ok()?;
                let next = after
                    .timestamp()
                    .div_euclid(period)
                    .checked_add(1)?
                    .checked_mul(period)?;
                DateTime::from_timestamp(next, 0)
            }
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron { expression, tz, .. } => f
                .debug_struct("Cron")
                .field("expression", expression)
                .field("tz", tz)
                .finish_non_exhaustive(),
            Self::Interval { every } => f.debug_struct("Interval").field("every", every).finish(),
        }
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(tz: &str) -> Result<chrono_tz::Tz, ValidationError> {
    tz.parse::<chrono_tz::Tz>()
        .map_err(|_| ValidationError::Timezone(tz.to_owned()))
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn hourly_preset_fires_on_the_hour() {
        let schedule = Schedule::parse("hourly", "UTC").unwrap();
        let next = schedule.next_after(at(2026, 3, 4, 10, 15, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 4, 11, 0, 0));
    }

    #[test]
    fn daily_preset_fires_at_midnight() {
        let schedule = Schedule::parse("Daily", "UTC").unwrap();
        let next = schedule.next_after(at(2026, 3, 4, 10, 15, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 5, 0, 0, 0));
    }

    #[test]
    fn weekly_preset_fires_on_sunday() {
        let schedule = Schedule::parse("weekly", "UTC").unwrap();
        let next = schedule.next_after(at(2026, 3, 4, 10, 15, 0)).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!(next.hour(), 0);
    }

    #[test]
    fn monthly_preset_fires_on_the_first() {
        let schedule = Schedule::parse("monthly", "UTC").unwrap();
        let next = schedule.next_after(at(2026, 3, 4, 10, 15, 0)).unwrap();
        assert_eq!(next, at(2026, 4, 1, 0, 0, 0));
    }

    #[test]
    fn preset_respects_timezone() {
        let schedule = Schedule::parse("daily", "America/New_York").unwrap();
        let next = schedule.next_after(at(2026, 1, 10, 12, 0, 0)).unwrap();
        // Midnight in New York is 05:00 UTC in January.
        assert_eq!(next, at(2026, 1, 11, 5, 0, 0));
    }

    #[test]
    fn next_after_is_strictly_later() {
        let schedule = Schedule::parse("hourly", "UTC").unwrap();
        let boundary = at(2026, 3, 4, 11, 0, 0);
        assert_eq!(schedule.next_after(boundary).unwrap(), at(2026, 3, 4, 12, 0, 0));
    }

    #[test]
    fn cron_expression() {
        let schedule = Schedule::parse("30 2 * * *", "UTC").unwrap();
        let next = schedule.next_after(at(2026, 3, 4, 10, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 5, 2, 30, 0));
    }

    #[test]
    fn interval_is_epoch_aligned() {
        let schedule = Schedule::parse("every 15m", "UTC").unwrap();
        let next = schedule.next_after(at(2026, 3, 4, 10, 7, 12)).unwrap();
        assert_eq!(next, at(2026, 3, 4, 10, 15, 0));
        let after = schedule.next_after(next).unwrap();
        assert_eq!(after, at(2026, 3, 4, 10, 30, 0));
    }

    #[test]
    fn interval_units() {
        for (expr, secs) in [("every 90s", 90), ("every 2h", 7_200), ("@every 1d", 86_400)] {
            match Schedule::parse(expr, "UTC").unwrap() {
                Schedule::Interval { every } => assert_eq!(every.as_secs(), secs, "{expr}"),
                Schedule::Cron { .. } => panic!("{expr} parsed as cron"),
            }
        }
    }

    #[test]
    fn interval_below_minimum_is_rejected() {
        let err = Schedule::parse("every 30s", "UTC").unwrap_err();
        assert!(matches!(err, ValidationError::Schedule { .. }));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Schedule::parse("whenever", "UTC").is_err());
        assert!(Schedule::parse("61 * * * *", "UTC").is_err());
        assert_eq!(
            Schedule::parse("  ", "UTC").unwrap_err(),
            ValidationError::Empty { field: "schedule" }
        );
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = Schedule::parse("daily", "Mars/Olympus").unwrap_err();
        assert_eq!(err, ValidationError::Timezone("Mars/Olympus".into()));
    }

    #[test]
    fn interval_still_checks_timezone() {
        let err = Schedule::parse("every 15m", "Mars/Olympus").unwrap_err();
        assert_eq!(err, ValidationError::Timezone("Mars/Olympus".into()));
        assert!(Schedule::parse("every 15m", "Europe/Berlin").is_ok());
    }

    #[test]
    fn debug_shows_expression() {
        let schedule = Schedule::parse("hourly", "UTC").unwrap();
        assert!(format!("{schedule:?}").contains("hourly"));
    }
}
