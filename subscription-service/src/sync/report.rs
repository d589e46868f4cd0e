//! Reporting aggregator: monthly counts of subscriptions in force.

use crate::models::Subscription;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;

/// One calendar-month bucket, keyed "M-YYYY" (month without zero padding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyCount {
    pub key: String,
    pub value: u64,
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of month is a valid timestamp")
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// Default reporting window: the trailing 12 calendar months ending now.
pub fn default_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let (mut year, mut month) = (now.year(), now.month());
    for _ in 0..11 {
        (year, month) = prev_month(year, month);
    }
    (month_start(year, month), now)
}

/// Partition `[start, end]` into calendar months and count, per month, the
/// subscriptions registered on or before that month and not yet expired as
/// of that month. The working set is filtered in memory; callers load it
/// once, not once per bucket. Output is ordered oldest first, one entry per
/// month in the window.
pub fn monthly_active_counts(
    subscriptions: &[Subscription],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<MonthlyCount> {
    let mut counts = Vec::new();
    if end < start {
        return counts;
    }

    let (mut year, mut month) = (start.year(), start.month());
    let last = (end.year(), end.month());

    loop {
        let bucket_start = month_start(year, month);
        let bucket_end = {
            let (ny, nm) = next_month(year, month);
            month_start(ny, nm)
        };

        let value = subscriptions
            .iter()
            .filter(|s| s.registration_date < bucket_end && s.expiration >= bucket_start)
            .count() as u64;

        counts.push(MonthlyCount {
            key: format!("{}-{}", month, year),
            value,
        });

        if (year, month) == last {
            break;
        }
        (year, month) = next_month(year, month);
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn subscription(registered: DateTime<Utc>, expires: DateTime<Utc>) -> Subscription {
        Subscription {
            subscription_id: Uuid::new_v4(),
            code: Some("SUB-1".to_string()),
            user_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            course: "essay".to_string(),
            expiration: expires,
            registration_date: registered,
            active: true,
            created_utc: registered,
            updated_utc: registered,
        }
    }

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn one_entry_per_month_oldest_first() {
        let counts = monthly_active_counts(&[], at(2025, 11, 1), at(2026, 2, 1));
        let keys: Vec<_> = counts.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["11-2025", "12-2025", "1-2026", "2-2026"]);
        assert!(counts.iter().all(|c| c.value == 0));
    }

    #[test]
    fn subscription_counts_from_registration_until_expiry() {
        let subs = vec![subscription(at(2026, 1, 10), at(2026, 3, 10))];
        let counts = monthly_active_counts(&subs, at(2025, 12, 1), at(2026, 4, 30));

        let by_key: Vec<(String, u64)> =
            counts.into_iter().map(|c| (c.key, c.value)).collect();
        assert_eq!(
            by_key,
            vec![
                ("12-2025".to_string(), 0),
                ("1-2026".to_string(), 1),
                ("2-2026".to_string(), 1),
                ("3-2026".to_string(), 1),
                ("4-2026".to_string(), 0),
            ]
        );
    }

    #[test]
    fn expiry_on_first_of_month_still_counts_that_month() {
        let subs = vec![subscription(at(2026, 1, 1), month_start(2026, 3))];
        let counts = monthly_active_counts(&subs, at(2026, 3, 1), at(2026, 3, 31));
        assert_eq!(counts[0].value, 1);
    }

    #[test]
    fn empty_window_when_end_precedes_start() {
        let counts = monthly_active_counts(&[], at(2026, 3, 1), at(2026, 1, 1));
        assert!(counts.is_empty());
    }

    #[test]
    fn default_window_spans_twelve_months() {
        let (start, end) = default_window(at(2026, 8, 6));
        assert_eq!(start, month_start(2025, 9));
        let counts = monthly_active_counts(&[], start, end);
        assert_eq!(counts.len(), 12);
        assert_eq!(counts.first().unwrap().key, "9-2025");
        assert_eq!(counts.last().unwrap().key, "8-2026");
    }
}
