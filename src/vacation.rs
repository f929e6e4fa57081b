// 🏖️ Vacation Index - delivery suspensions by subscriber
// Intervals are grouped per subscriber key and never merged. A subscriber is
// suspended on a date when ANY of its intervals contains that date.

use crate::rates::normalize_key;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// POLICY
// ============================================================================

/// What to do with a vacation row that has no end date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VacationPolicy {
    /// Open-ended hold: active from its begin date onwards
    OpenEnded,
    /// Treat the row as invalid and drop it
    DropOpenEnded,
}

impl Default for VacationPolicy {
    fn default() -> Self {
        VacationPolicy::OpenEnded
    }
}

// ============================================================================
// RAW RECORD + DATE PARSING
// ============================================================================

/// One row of the vacation export, dates still as exported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacationRecord {
    pub subscriber: String,
    pub begin: String,
    pub end: String,
    pub line_number: u64,
}

impl VacationRecord {
    pub fn new(subscriber: &str, begin: &str, end: &str) -> Self {
        VacationRecord {
            subscriber: subscriber.to_string(),
            begin: begin.to_string(),
            end: end.to_string(),
            line_number: 0,
        }
    }
}

/// Parse an export date: M/D/YY or M/D/YYYY
///
/// Two-digit years pivot like `%y`: 69-99 → 1969-1999, 00-68 → 2000-2068.
pub fn parse_export_date(value: &str) -> Option<NaiveDate> {
    let mut parts = value.trim().split('/');
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let day: u32 = parts.next()?.trim().parse().ok()?;
    let year_str = parts.next()?.trim();
    if parts.next().is_some() {
        return None;
    }

    let year: i32 = match year_str.len() {
        2 => {
            let yy: i32 = year_str.parse().ok()?;
            if yy >= 69 {
                1900 + yy
            } else {
                2000 + yy
            }
        }
        4 => year_str.parse().ok()?,
        _ => return None,
    };

    NaiveDate::from_ymd_opt(year, month, day)
}

// ============================================================================
// INTERVAL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacationInterval {
    pub subscriber: String,
    pub begin: NaiveDate,
    /// None = open-ended
    pub end: Option<NaiveDate>,
}

impl VacationInterval {
    /// Inclusive on both ends
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.begin <= date && self.end.map_or(true, |end| date <= end)
    }
}

// ============================================================================
// INDEX
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct VacationIndex {
    intervals: HashMap<String, Vec<VacationInterval>>,
    dropped: usize,
}

impl VacationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from export rows; rows whose dates do not parse are dropped one by one
    pub fn build(records: &[VacationRecord], policy: VacationPolicy) -> Self {
        let mut index = VacationIndex::new();

        for record in records {
            match Self::interval_from_record(record, policy) {
                Some(interval) => index.insert(interval),
                None => {
                    index.dropped += 1;
                    log::debug!(
                        "Dropped vacation row {} for subscriber '{}' (begin '{}', end '{}')",
                        record.line_number,
                        record.subscriber,
                        record.begin,
                        record.end
                    );
                }
            }
        }

        log::info!(
            "Vacation index: {} subscribers, {} intervals, {} rows dropped ({:?})",
            index.subscriber_count(),
            index.interval_count(),
            index.dropped,
            policy
        );

        index
    }

    fn interval_from_record(
        record: &VacationRecord,
        policy: VacationPolicy,
    ) -> Option<VacationInterval> {
        let subscriber = normalize_key(&record.subscriber);
        if subscriber.is_empty() {
            return None;
        }

        let begin = parse_export_date(&record.begin)?;

        let end = if record.end.trim().is_empty() {
            match policy {
                VacationPolicy::OpenEnded => None,
                VacationPolicy::DropOpenEnded => return None,
            }
        } else {
            Some(parse_export_date(&record.end)?)
        };

        Some(VacationInterval {
            subscriber,
            begin,
            end,
        })
    }

    pub fn insert(&mut self, interval: VacationInterval) {
        self.intervals
            .entry(interval.subscriber.clone())
            .or_default()
            .push(interval);
    }

    /// True when any interval for this subscriber contains `date`
    pub fn is_active(&self, subscriber: &str, date: NaiveDate) -> bool {
        self.intervals
            .get(&normalize_key(subscriber))
            .map_or(false, |list| list.iter().any(|i| i.is_active_on(date)))
    }

    pub fn intervals_for(&self, subscriber: &str) -> &[VacationInterval] {
        self.intervals
            .get(&normalize_key(subscriber))
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    pub fn subscriber_count(&self) -> usize {
        self.intervals.len()
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.values().map(|list| list.len()).sum()
    }

    /// Subscribers with at least one interval active on `date`
    pub fn active_subscriber_count(&self, date: NaiveDate) -> usize {
        self.intervals
            .values()
            .filter(|list| list.iter().any(|i| i.is_active_on(date)))
            .count()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_export_date() {
        assert_eq!(parse_export_date("12/01/25"), Some(date(2025, 12, 1)));
        assert_eq!(parse_export_date("1/5/99"), Some(date(1999, 1, 5)));
        assert_eq!(parse_export_date("12/01/69"), Some(date(1969, 12, 1)));
        assert_eq!(parse_export_date("12/31/68"), Some(date(2068, 12, 31)));
        assert_eq!(parse_export_date("03/15/2024"), Some(date(2024, 3, 15)));
        assert_eq!(parse_export_date("02/30/25"), None);
        assert_eq!(parse_export_date("2025-01-01"), None);
        assert_eq!(parse_export_date(""), None);
        assert_eq!(parse_export_date("1/2/3/4"), None);
    }

    #[test]
    fn test_containment_boundaries() {
        let today = date(2025, 6, 15);
        let index = VacationIndex::build(
            &[
                VacationRecord::new("1", "06/15/25", "06/20/25"), // begins today
                VacationRecord::new("2", "06/10/25", "06/15/25"), // ends today
                VacationRecord::new("3", "06/01/25", "06/14/25"), // ended yesterday
                VacationRecord::new("4", "06/16/25", "06/30/25"), // starts tomorrow
            ],
            VacationPolicy::OpenEnded,
        );

        assert!(index.is_active("1", today));
        assert!(index.is_active("2", today));
        assert!(!index.is_active("3", today));
        assert!(!index.is_active("4", today));
        assert!(!index.is_active("5", today));
        assert_eq!(index.active_subscriber_count(today), 2);
    }

    #[test]
    fn test_open_ended_policy_activates_from_begin() {
        let records = vec![
            VacationRecord::new("7", "06/01/25", ""),
            VacationRecord::new("8", "07/01/25", "  "),
        ];
        let index = VacationIndex::build(&records, VacationPolicy::OpenEnded);

        assert_eq!(index.dropped(), 0);
        assert!(index.is_active("7", date(2025, 6, 1)));
        assert!(index.is_active("7", date(2030, 1, 1)));
        assert!(!index.is_active("7", date(2025, 5, 31)));
        assert!(!index.is_active("8", date(2025, 6, 15)));
        assert_eq!(index.intervals_for("7")[0].end, None);
    }

    #[test]
    fn test_drop_open_ended_policy() {
        let records = vec![
            VacationRecord::new("7", "06/01/25", ""),
            VacationRecord::new("9", "06/01/25", "06/30/25"),
        ];
        let index = VacationIndex::build(&records, VacationPolicy::DropOpenEnded);

        assert_eq!(index.dropped(), 1);
        assert!(!index.is_active("7", date(2025, 6, 15)));
        assert!(index.is_active("9", date(2025, 6, 15)));
    }

    #[test]
    fn test_bad_dates_drop_only_that_interval() {
        let records = vec![
            VacationRecord::new("5", "not a date", "06/30/25"),
            VacationRecord::new("5", "06/01/25", "13/45/25"),
            VacationRecord::new("5", "06/10/25", "06/20/25"),
            VacationRecord::new("6", "", "06/20/25"),
        ];
        let index = VacationIndex::build(&records, VacationPolicy::OpenEnded);

        assert_eq!(index.dropped(), 3);
        assert_eq!(index.interval_count(), 1);
        assert!(index.is_active("5", date(2025, 6, 15)));
        assert!(!index.is_active("6", date(2025, 6, 15)));
    }

    #[test]
    fn test_multiple_intervals_are_ored_and_kept() {
        let records = vec![
            VacationRecord::new("11", "01/01/25", "01/10/25"),
            VacationRecord::new("11", "06/01/25", "06/10/25"),
            VacationRecord::new("11", "06/05/25", "06/20/25"),
        ];
        let index = VacationIndex::build(&records, VacationPolicy::OpenEnded);

        assert_eq!(index.subscriber_count(), 1);
        assert_eq!(index.intervals_for("11").len(), 3);
        assert!(index.is_active("11", date(2025, 1, 5)));
        assert!(index.is_active("11", date(2025, 6, 15)));
        assert!(!index.is_active("11", date(2025, 3, 1)));
    }

    #[test]
    fn test_last_century_open_hold_is_active() {
        let index = VacationIndex::build(
            &[VacationRecord::new("5", "01/01/98", "")],
            VacationPolicy::OpenEnded,
        );

        assert_eq!(index.intervals_for("5")[0].begin, date(1998, 1, 1));
        assert!(index.is_active("5", date(2025, 6, 15)));
    }

    #[test]
    fn test_numeric_keys_normalized() {
        let index = VacationIndex::build(
            &[VacationRecord::new(" 0042 ", "06/01/25", "06/30/25")],
            VacationPolicy::OpenEnded,
        );
        assert!(index.is_active("42", date(2025, 6, 2)));
        assert!(index.is_active("042", date(2025, 6, 2)));
        assert_eq!(normalize_key("ABC "), "ABC");
    }
}
