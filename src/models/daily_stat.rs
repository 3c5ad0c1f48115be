use chrono::{DateTime, Days, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::null_default;

/// Per-ad, per-day rollup of view/click counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStat {
    #[serde(rename = "$id")]
    pub id: String,
    pub ad_id: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_default")]
    pub views: u64,
    #[serde(default, deserialize_with = "null_default")]
    pub clicks: u64,
}

/// `[start, end)` of one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    /// The server-local calendar day containing `now`.
    pub fn containing(now: DateTime<Utc>) -> Self {
        Self::in_tz(now, &Local)
    }

    pub fn in_tz<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> Self {
        let day = now.with_timezone(tz).date_naive();
        let next = day.checked_add_days(Days::new(1)).unwrap_or(day);
        Self {
            start: midnight(day, tz),
            end: midnight(next, tz),
        }
    }
}

/// Local midnight; on a DST gap fall back to treating the date as UTC.
fn midnight<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let naive = day.and_hms_opt(0, 0, 0).unwrap_or_default();
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_utc_day_window() {
        let now = "2026-05-10T15:45:00Z".parse::<DateTime<Utc>>().unwrap();
        let w = DayWindow::in_tz(now, &Utc);
        assert_eq!(w.start.to_rfc3339(), "2026-05-10T00:00:00+00:00");
        assert_eq!(w.end.to_rfc3339(), "2026-05-11T00:00:00+00:00");
    }

    #[test]
    fn test_offset_day_window_uses_local_midnight() {
        // 02:00 UTC is still the previous evening at UTC-6
        let now = "2026-05-10T02:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let tz = FixedOffset::west_opt(6 * 3600).unwrap();
        let w = DayWindow::in_tz(now, &tz);
        assert_eq!(w.start.to_rfc3339(), "2026-05-09T06:00:00+00:00");
        assert_eq!(w.end.to_rfc3339(), "2026-05-10T06:00:00+00:00");
    }
}
