// ABOUTME: Timestamp type in whole seconds since the LabVIEW epoch (1904-01-01 UTC)
// ABOUTME: Day arithmetic used by chunk planning and conversions to chrono for the CLI

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Seconds between the LabVIEW epoch and the Unix epoch.
pub const LABVIEW_UNIX_OFFSET: i64 = 2_082_844_800;

/// A point in time as stored in the telemetry `Timestamp` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_days(days: i64) -> Self {
        Timestamp(days * SECONDS_PER_DAY)
    }

    /// Convert a fractional LabVIEW time, flooring to whole seconds.
    ///
    /// Returns `None` for NaN, infinities and values outside the chrono range.
    pub fn from_lv_seconds(lv: f64) -> Option<Self> {
        if !lv.is_finite() {
            return None;
        }
        let secs = lv.floor();
        if secs < i64::MIN as f64 || secs > i64::MAX as f64 {
            return None;
        }
        let ts = Timestamp(secs as i64);
        ts.to_datetime().map(|_| ts)
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Timestamp(dt.timestamp() + LABVIEW_UNIX_OFFSET)
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let unix = self.0.checked_sub(LABVIEW_UNIX_OFFSET)?;
        Utc.timestamp_opt(unix, 0).single()
    }

    /// Whole days since the LabVIEW epoch (floor).
    pub fn day_number(self) -> i64 {
        self.0.div_euclid(SECONDS_PER_DAY)
    }

    /// UTC calendar date containing this instant.
    pub fn date(self) -> Option<NaiveDate> {
        self.to_datetime().map(|dt| dt.date_naive())
    }

    pub fn is_midnight(self) -> bool {
        self.0.rem_euclid(SECONDS_PER_DAY) == 0
    }

    pub fn plus_seconds(self, secs: i64) -> Self {
        Timestamp(self.0.saturating_add(secs))
    }

    pub fn plus_days(self, days: i64) -> Self {
        self.plus_seconds(days.saturating_mul(SECONDS_PER_DAY))
    }
}

/// First instant of a UTC calendar day.
pub fn start_of_day(day: NaiveDate) -> Timestamp {
    let midnight = Utc.from_utc_datetime(&day.and_time(NaiveTime::default()));
    Timestamp::from_datetime(midnight)
}

/// Every calendar day touched by the half-open interval `[start, end)`.
///
/// An end exactly at midnight does not pull in the following day.
pub fn days_touched(start: Timestamp, end: Timestamp) -> Vec<NaiveDate> {
    if end <= start {
        return Vec::new();
    }
    let (Some(first), Some(last)) = (start.date(), Timestamp(end.0 - 1).date()) else {
        return Vec::new();
    };
    let mut days = Vec::new();
    let mut day = first;
    while day <= last {
        days.push(day);
        day += Duration::days(1);
    }
    days
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
