use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Time bucket size of a rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
    /// ISO week, Monday 00:00 UTC start.
    Weekly,
    /// Calendar month, first day 00:00 UTC start.
    Monthly,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Hourly,
        Granularity::Daily,
        Granularity::Weekly,
        Granularity::Monthly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        match self {
            Granularity::Hourly => midnight(date) + TimeDelta::hours(i64::from(ts.hour())),
            Granularity::Daily => midnight(date),
            Granularity::Weekly => {
                let back = i64::from(date.weekday().num_days_from_monday());
                midnight(date - TimeDelta::days(back))
            },
            Granularity::Monthly => midnight(first_of_month(date)),
        }
    }

    /// Exclusive end of the bucket starting at `start`.
    ///
    /// `start` must already be aligned with [`Granularity::bucket_start`].
    pub fn bucket_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Hourly => start + TimeDelta::hours(1),
            Granularity::Daily => start + TimeDelta::days(1),
            Granularity::Weekly => start + TimeDelta::days(7),
            // Any day-1 plus 32 days lands early in the following month.
            Granularity::Monthly => Granularity::Monthly.bucket_start(start + TimeDelta::days(32)),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - TimeDelta::days(i64::from(date.day0()))
}

/// Window sizes shared by the rollup engine and the retention manager.
///
/// Both stages must agree on these values: retention may only drop hourly
/// rows that the rollup engine will never recompute again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    /// Number of trailing hour buckets (current hour included) recomputed per run.
    pub hourly_window_hours: u32,
    /// Raw samples and hourly rollups older than this are pruned.
    pub retention_days: u32,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            hourly_window_hours: 48,
            retention_days: 7,
        }
    }
}

impl Windows {
    /// Start of the oldest hour bucket still recomputed at `as_of`.
    pub fn hourly_window_start(&self, as_of: DateTime<Utc>) -> DateTime<Utc> {
        let span = i64::from(self.hourly_window_hours.max(1)) - 1;
        Granularity::Hourly.bucket_start(as_of) - TimeDelta::hours(span)
    }

    /// Rows strictly older than this instant are eligible for pruning.
    pub fn retention_cutoff(&self, as_of: DateTime<Utc>) -> DateTime<Utc> {
        as_of - TimeDelta::days(i64::from(self.retention_days))
    }

    /// Raw samples must outlive every bucket still recomputed from them: the
    /// hourly window and the current day.
    pub fn validate(&self) -> Result<(), String> {
        let retained_hours = u64::from(self.retention_days) * 24;
        let recomputed_hours = u64::from(self.hourly_window_hours.max(24));
        if retained_hours < recomputed_hours {
            return Err(format!(
                "retention_days ({}) must keep at least {} hours of raw samples",
                self.retention_days, recomputed_hours
            ));
        }
        Ok(())
    }
}
