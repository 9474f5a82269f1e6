//! Daily UTC schedule for scheduled-time-tick triggers.

use crate::error::ConfigError;
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A fixed time of day, in UTC, at which a scheduled run fires.
///
/// Parsed from the daily cron form `M H * * *`; every other cron shape is
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DailySchedule {
    time: NaiveTime,
}

impl DailySchedule {
    /// Midnight UTC, the default for the nightly job.
    pub fn midnight() -> Self {
        Self {
            time: NaiveTime::MIN,
        }
    }

    pub fn hour(&self) -> u32 {
        self.time.hour()
    }

    pub fn minute(&self) -> u32 {
        self.time.minute()
    }

    /// Next tick strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let candidate = after.date_naive().and_time(self.time).and_utc();
        if candidate > after {
            candidate
        } else {
            candidate + Duration::days(1)
        }
    }

    /// Cron representation (`M H * * *`).
    pub fn to_cron(&self) -> String {
        format!("{} {} * * *", self.minute(), self.hour())
    }
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self::midnight()
    }
}

impl FromStr for DailySchedule {
    type Err = ConfigError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidSchedule(expr.to_string());

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 || fields[2..].iter().any(|f| *f != "*") {
            return Err(invalid());
        }

        let minute: u32 = fields[0].parse().map_err(|_| invalid())?;
        let hour: u32 = fields[1].parse().map_err(|_| invalid())?;
        let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)?;

        Ok(Self { time })
    }
}

impl TryFrom<String> for DailySchedule {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DailySchedule> for String {
    fn from(schedule: DailySchedule) -> Self {
        schedule.to_cron()
    }
}

impl std::fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_cron())
    }
}
