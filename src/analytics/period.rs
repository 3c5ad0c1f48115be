use chrono::{DateTime, Duration, Utc};

use crate::models::analytics::{Change, Metric, Period, Trend};
use crate::models::Timestamped;

impl Period {
    /// The current range plus an equal-length range ending 1 ms before it starts.
    pub fn with_previous(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let previous_end = start - Duration::milliseconds(1);
        let previous_start = previous_end - (end - start);
        Self {
            start,
            end,
            previous_start,
            previous_end,
        }
    }
}

/// Records whose own timestamp lies in `[start, end]`. Records without a
/// timestamp belong to no period.
pub fn filter_by_date_range<T: Timestamped + Clone>(
    records: &[T],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<T> {
    records
        .iter()
        .filter(|r| r.timestamp().is_some_and(|ts| ts >= start && ts <= end))
        .cloned()
        .collect()
}

/// Signed percentage change. A zero baseline never divides: it reports
/// `neutral` when nothing happened in either period and `new` otherwise.
pub fn calculate_change(current: f64, previous: f64) -> Change {
    if previous == 0.0 {
        return if current == 0.0 {
            Change {
                percentage: Some(0.0),
                trend: Trend::Neutral,
            }
        } else {
            Change {
                percentage: None,
                trend: Trend::New,
            }
        };
    }

    let percentage = (current - previous) / previous * 100.0;
    let trend = if percentage > 0.0 {
        Trend::Up
    } else if percentage < 0.0 {
        Trend::Down
    } else {
        Trend::Neutral
    };
    Change {
        percentage: Some(percentage),
        trend,
    }
}

pub fn metric(current: f64, previous: f64) -> Metric {
    Metric {
        current,
        previous,
        change: calculate_change(current, previous),
    }
}

/// `count` as a metric, for the many "how many records" KPIs.
pub fn count_metric(current: usize, previous: usize) -> Metric {
    metric(current as f64, previous as f64)
}
