//! Business-date partitions and collision-resistant object names.
//!
//! Raw and enriched stores share the layout
//! `<root>/context_date=YYYY-MM-DD/<stamp>.<ext>`.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::config::PartitionConfig;

/// Object name timestamp format, microsecond resolution.
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S%6f";

/// One business-date partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    root: String,
    date: NaiveDate,
}

impl Partition {
    pub fn new(root: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            root: root.into(),
            date,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Key prefix, e.g. `telegram/context_date=2024-03-09`.
    pub fn prefix(&self) -> String {
        format!("{}/context_date={}", self.root, self.date.format("%Y-%m-%d"))
    }

    /// Full key for an object named by `stamp` with the given extension.
    pub fn object_key(&self, stamp: DateTime<Utc>, extension: &str) -> String {
        format!(
            "{}/{}.{}",
            self.prefix(),
            stamp.format(STAMP_FORMAT),
            extension
        )
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix())
    }
}

/// Maps wall-clock instants onto business-date partitions.
///
/// The business day is the calendar date in a fixed UTC offset, so a run
/// at 01:00 UTC still belongs to the previous day when the offset is -3.
#[derive(Debug, Clone)]
pub struct PartitionScheme {
    root: String,
    offset: FixedOffset,
    lookback_days: u32,
}

impl PartitionScheme {
    /// Returns `None` when the offset is not a valid UTC offset.
    pub fn new(root: impl Into<String>, utc_offset_hours: i32, lookback_days: u32) -> Option<Self> {
        let offset = FixedOffset::east_opt(utc_offset_hours.checked_mul(3600)?)?;
        Some(Self {
            root: root.into(),
            offset,
            lookback_days,
        })
    }

    /// Build a scheme from validated configuration.
    ///
    /// Falls back to UTC if the offset is out of range; `Config::validate`
    /// rejects such values before this is reached.
    pub fn from_config(config: &PartitionConfig) -> Self {
        Self::new(&config.root, config.utc_offset_hours, config.lookback_days).unwrap_or_else(
            || Self {
                root: config.root.clone(),
                offset: Utc.fix(),
                lookback_days: config.lookback_days,
            },
        )
    }

    /// Business date of `now`.
    pub fn business_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Partition raw payloads land in at `now` (the current business day).
    pub fn landing_partition(&self, now: DateTime<Utc>) -> Partition {
        Partition::new(&self.root, self.business_date(now))
    }

    /// Partition an ETL run at `now` processes (`lookback_days` behind).
    pub fn etl_partition(&self, now: DateTime<Utc>) -> Partition {
        let date = self.business_date(now) - Duration::days(i64::from(self.lookback_days));
        Partition::new(&self.root, date)
    }
}

/// Hands out strictly increasing object stamps.
///
/// Wall-clock time is used when it has moved past the last stamp; otherwise
/// the last stamp is bumped by one microsecond. Two writers in the same
/// process therefore never produce the same key.
#[derive(Debug, Default)]
pub struct StampClock {
    last_micros: AtomicI64,
}

impl StampClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next stamp at or after `now`.
    pub fn next(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let wall = now.timestamp_micros();
        let mut last = self.last_micros.load(Ordering::Relaxed);
        loop {
            let candidate = wall.max(last + 1);
            match self.last_micros.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return DateTime::from_timestamp_micros(candidate).unwrap_or(now),
                Err(actual) => last = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scheme() -> PartitionScheme {
        PartitionScheme::new("telegram", -3, 1).unwrap()
    }

    #[test]
    fn test_prefix_format() {
        let partition = Partition::new("telegram", NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        assert_eq!(partition.prefix(), "telegram/context_date=2024-03-09");
        assert_eq!(partition.to_string(), "telegram/context_date=2024-03-09");
    }

    #[test]
    fn test_object_key_has_microseconds() {
        let partition = Partition::new("telegram", NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        let stamp = Utc
            .with_ymd_and_hms(2024, 3, 10, 12, 30, 5)
            .unwrap()
            .checked_add_signed(Duration::microseconds(42))
            .unwrap();
        assert_eq!(
            partition.object_key(stamp, "parquet"),
            "telegram/context_date=2024-03-09/20240310123005000042.parquet"
        );
    }

    #[test]
    fn test_etl_partition_is_previous_business_day() {
        // 14:00 UTC is 11:00 at -3, same calendar day.
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 14, 0, 0).unwrap();
        assert_eq!(
            scheme().etl_partition(now).prefix(),
            "telegram/context_date=2024-03-09"
        );
    }

    #[test]
    fn test_offset_crosses_midnight() {
        // 01:30 UTC on the 10th is still the 9th at -3.
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 1, 30, 0).unwrap();
        assert_eq!(
            scheme().landing_partition(now).date(),
            NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
        );
        assert_eq!(
            scheme().etl_partition(now).date(),
            NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
        );
    }

    #[test]
    fn test_etl_partition_across_month_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            scheme().etl_partition(now).prefix(),
            "telegram/context_date=2024-02-29"
        );
    }

    #[test]
    fn test_zero_lookback_is_today() {
        let scheme = PartitionScheme::new("telegram", -3, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 14, 0, 0).unwrap();
        assert_eq!(scheme.etl_partition(now), scheme.landing_partition(now));
    }

    #[test]
    fn test_invalid_offset_rejected() {
        assert!(PartitionScheme::new("telegram", 30, 1).is_none());
    }

    #[test]
    fn test_stamp_clock_strictly_increasing() {
        let clock = StampClock::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

        let first = clock.next(now);
        let second = clock.next(now);
        let third = clock.next(now);

        assert_eq!(first, now);
        assert!(second > first);
        assert!(third > second);
        assert_eq!((second - first).num_microseconds(), Some(1));
    }

    #[test]
    fn test_stamp_clock_follows_wall_clock_forward() {
        let clock = StampClock::new();
        let earlier = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 1).unwrap();

        clock.next(earlier);
        assert_eq!(clock.next(later), later);
    }
}
