// 📊 Subscription Aggregator - per-publication circulation metrics
// Single pass over the subscription export in input order. Every row either
// lands in exactly one publication's counters or in exactly one skip counter.

use crate::config::ReconConfig;
use crate::delivery::{ChannelClassifier, DeliveryChannel};
use crate::error::RowError;
use crate::rates::{normalize_key, RateCatalog};
use crate::vacation::VacationIndex;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// SUBSCRIPTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: String,
    pub rate_id: String,
    pub route: String,
    /// 0 = no vacation hold, otherwise the vacation-export subscriber key
    pub vacation_indicator: u64,
}

impl Subscription {
    pub fn new(id: &str, status: &str, rate_id: &str, route: &str, vacation_indicator: u64) -> Self {
        Subscription {
            id: id.to_string(),
            status: status.to_string(),
            rate_id: rate_id.to_string(),
            route: route.to_string(),
            vacation_indicator,
        }
    }
}

// ============================================================================
// EDITION METRICS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditionMetrics {
    pub total_active: u64,
    pub on_vacation: u64,
    pub deliverable: u64,
    pub mail: u64,
    pub carrier: u64,
    pub digital: u64,
    /// rate id → active subscriptions on that rate
    pub rate_counts: BTreeMap<String, u64>,
}

/// One line of a publication's rate distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateShare {
    pub rank: usize,
    pub rate_id: String,
    pub subscriber_count: u64,
    /// Share of the publication's total_active, 0-100, two decimals
    pub percentage: f64,
}

impl EditionMetrics {
    /// Count one active subscription; all counters move together
    pub fn record(&mut self, channel: DeliveryChannel, on_vacation: bool, rate_id: &str) {
        self.total_active += 1;

        if on_vacation {
            self.on_vacation += 1;
        } else {
            self.deliverable += 1;
        }

        match channel {
            DeliveryChannel::Mail => self.mail += 1,
            DeliveryChannel::Carrier => self.carrier += 1,
            DeliveryChannel::Digital => self.digital += 1,
        }

        *self.rate_counts.entry(rate_id.to_string()).or_insert(0) += 1;
    }

    /// deliverable + on_vacation == total_active and mail + carrier + digital == total_active
    pub fn is_consistent(&self) -> bool {
        self.deliverable + self.on_vacation == self.total_active
            && self.mail + self.carrier + self.digital == self.total_active
    }

    /// Most used rate ids, count descending then rate id ascending
    pub fn top_rates(&self, limit: usize) -> Vec<RateShare> {
        let mut counts: Vec<(&String, &u64)> = self.rate_counts.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        counts
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (rate_id, count))| RateShare {
                rank: i + 1,
                rate_id: rate_id.clone(),
                subscriber_count: *count,
                percentage: percentage(*count, self.total_active),
            })
            .collect()
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}

// ============================================================================
// SKIP COUNTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    /// Status other than the active marker
    pub inactive: u64,
    /// Row could not be read (missing field, bad number)
    pub malformed: u64,
    /// Active, but the rate id has no catalog entry
    pub unresolved_rate: u64,
    /// Active and resolved, but the publication is not tracked
    pub unknown_publication: u64,
    /// unresolved rate id → subscriptions dropped because of it
    pub unresolved_by_rate: BTreeMap<String, u64>,
    /// untracked publication code → subscriptions dropped because of it
    pub unknown_by_publication: BTreeMap<String, u64>,
}

impl SkipCounts {
    pub fn total(&self) -> u64 {
        self.inactive + self.malformed + self.unresolved_rate + self.unknown_publication
    }
}

// ============================================================================
// AGGREGATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub reference_date: NaiveDate,
    pub metrics: BTreeMap<String, EditionMetrics>,
    pub skipped: SkipCounts,
    /// Rows seen, counted or skipped
    pub rows_read: u64,
}

impl AggregationResult {
    pub fn total_active(&self) -> u64 {
        self.metrics.values().map(|m| m.total_active).sum()
    }

    pub fn get(&self, publication: &str) -> Option<&EditionMetrics> {
        self.metrics.get(publication)
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct SubscriptionAggregator {
    active_status: String,
    tracked: BTreeSet<String>,
}

impl SubscriptionAggregator {
    pub fn new(active_status: &str, tracked: BTreeSet<String>) -> Self {
        SubscriptionAggregator {
            active_status: active_status.trim().to_string(),
            tracked,
        }
    }

    pub fn from_config(config: &ReconConfig) -> Self {
        Self::new(&config.active_status, config.tracked_codes())
    }

    pub fn aggregate(
        &self,
        subscriptions: &[Subscription],
        catalog: &RateCatalog,
        vacations: &VacationIndex,
        classifier: &dyn ChannelClassifier,
        reference_date: NaiveDate,
    ) -> AggregationResult {
        self.aggregate_rows(
            subscriptions.iter().map(Ok),
            catalog,
            vacations,
            classifier,
            reference_date,
        )
    }

    /// Aggregate parsed rows, counting the ones the parser rejected as malformed
    pub fn aggregate_rows<'a, I>(
        &self,
        rows: I,
        catalog: &RateCatalog,
        vacations: &VacationIndex,
        classifier: &dyn ChannelClassifier,
        reference_date: NaiveDate,
    ) -> AggregationResult
    where
        I: IntoIterator<Item = Result<&'a Subscription, &'a RowError>>,
    {
        let mut metrics: BTreeMap<String, EditionMetrics> = BTreeMap::new();
        let mut skipped = SkipCounts::default();
        let mut rows_read = 0;

        for row in rows {
            rows_read += 1;

            let sub = match row {
                Ok(sub) => sub,
                Err(err) => {
                    log::debug!("Skipping malformed subscription row: {}", err);
                    skipped.malformed += 1;
                    continue;
                }
            };

            if sub.status.trim() != self.active_status {
                skipped.inactive += 1;
                continue;
            }

            let rate_id = normalize_key(&sub.rate_id);
            let entry = match catalog.resolve(&rate_id) {
                Some(entry) => entry,
                None => {
                    skipped.unresolved_rate += 1;
                    *skipped
                        .unresolved_by_rate
                        .entry(rate_id.clone())
                        .or_insert(0) += 1;
                    continue;
                }
            };

            if !self.tracked.contains(&entry.publication) {
                skipped.unknown_publication += 1;
                *skipped
                    .unknown_by_publication
                    .entry(entry.publication.clone())
                    .or_insert(0) += 1;
                continue;
            }

            let channel = classifier.classify(&sub.route);
            let on_vacation = sub.vacation_indicator != 0
                && vacations.is_active(&sub.vacation_indicator.to_string(), reference_date);

            metrics
                .entry(entry.publication.clone())
                .or_default()
                .record(channel, on_vacation, &rate_id);
        }

        if skipped.unresolved_rate > 0 {
            log::warn!(
                "{} active subscriptions dropped: rate id not in catalog ({} distinct ids)",
                skipped.unresolved_rate,
                skipped.unresolved_by_rate.len()
            );
        }
        if skipped.malformed > 0 {
            log::warn!("{} malformed subscription rows skipped", skipped.malformed);
        }
        log::info!(
            "Aggregated {} rows into {} publications ({} skipped)",
            rows_read,
            metrics.len(),
            skipped.total()
        );

        AggregationResult {
            reference_date,
            metrics,
            skipped,
            rows_read,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryClassifier;
    use crate::rates::RateRecord;
    use crate::vacation::{VacationPolicy, VacationRecord};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
    }

    fn tracked(codes: &[&str]) -> BTreeSet<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    fn catalog() -> RateCatalog {
        RateCatalog::from_records(&[
            RateRecord::new("100", "TJ", "TJ 1 Year"),
            RateRecord::new("101", "TJ", "TJ 12 Months"),
            RateRecord::new("200", "TA", "TA 1 Year"),
            RateRecord::new("900", "XX", "Unknown paper"),
        ])
    }

    fn vacations() -> VacationIndex {
        VacationIndex::build(
            &[
                VacationRecord::new("5", "06/14/25", "06/16/25"),
                VacationRecord::new("6", "05/01/25", "05/31/25"),
            ],
            VacationPolicy::OpenEnded,
        )
    }

    fn run(subs: &[Subscription]) -> AggregationResult {
        SubscriptionAggregator::new("A", tracked(&["TJ", "TA"])).aggregate(
            subs,
            &catalog(),
            &vacations(),
            &DeliveryClassifier::new(),
            today(),
        )
    }

    #[test]
    fn test_mail_and_digital_with_one_hold() {
        let subs = vec![
            Subscription::new("1", "A", "100", "MAIL", 0),
            Subscription::new("2", "A", "100", "INTERNET", 5),
        ];
        let result = run(&subs);

        let tj = result.get("TJ").unwrap();
        assert_eq!(tj.total_active, 2);
        assert_eq!(tj.on_vacation, 1);
        assert_eq!(tj.deliverable, 1);
        assert_eq!(tj.mail, 1);
        assert_eq!(tj.digital, 1);
        assert_eq!(tj.carrier, 0);
        assert!(tj.is_consistent());
        assert_eq!(result.metrics.len(), 1);
    }

    #[test]
    fn test_zero_indicator_is_always_deliverable() {
        // Subscriber key 0 has an active interval, but indicator 0 means "no hold"
        let index = VacationIndex::build(
            &[VacationRecord::new("0", "01/01/25", "")],
            VacationPolicy::OpenEnded,
        );
        let subs = vec![Subscription::new("1", "A", "100", "CARRIER", 0)];
        let result = SubscriptionAggregator::new("A", tracked(&["TJ"])).aggregate(
            &subs,
            &catalog(),
            &index,
            &DeliveryClassifier::new(),
            today(),
        );

        let tj = result.get("TJ").unwrap();
        assert_eq!(tj.on_vacation, 0);
        assert_eq!(tj.deliverable, 1);
    }

    #[test]
    fn test_unknown_or_inactive_vacation_is_deliverable() {
        let subs = vec![
            Subscription::new("1", "A", "100", "MOTOR", 6),  // hold ended last month
            Subscription::new("2", "A", "100", "MOTOR", 77), // no such hold
        ];
        let result = run(&subs);

        let tj = result.get("TJ").unwrap();
        assert_eq!(tj.deliverable, 2);
        assert_eq!(tj.on_vacation, 0);
        assert_eq!(tj.carrier, 2);
    }

    #[test]
    fn test_unresolved_rate_counted_not_aggregated() {
        let subs = vec![
            Subscription::new("1", "A", "100", "MAIL", 0),
            Subscription::new("2", "A", "555", "MAIL", 0),
            Subscription::new("3", "A", "555", "CARRIER", 5),
            Subscription::new("4", "A", "556", "MAIL", 0),
        ];
        let result = run(&subs);

        assert_eq!(result.total_active(), 1);
        assert_eq!(result.skipped.unresolved_rate, 3);
        assert_eq!(result.skipped.unresolved_by_rate.get("555"), Some(&2));
        assert_eq!(result.skipped.unresolved_by_rate.get("556"), Some(&1));
        for metrics in result.metrics.values() {
            assert!(!metrics.rate_counts.contains_key("555"));
        }
    }

    #[test]
    fn test_padded_rate_ids_share_one_histogram_bucket() {
        let subs = vec![
            Subscription::new("1", "A", "0100", "MAIL", 0),
            Subscription::new("2", "A", "100", "MAIL", 0),
            Subscription::new("3", "A", "0555", "MAIL", 0),
        ];
        let result = run(&subs);

        let tj = result.get("TJ").unwrap();
        assert_eq!(tj.total_active, 2);
        assert_eq!(tj.rate_counts.get("100"), Some(&2));
        assert_eq!(result.skipped.unresolved_by_rate.get("555"), Some(&1));
    }

    #[test]
    fn test_inactive_and_untracked_skipped() {
        let subs = vec![
            Subscription::new("1", "I", "100", "MAIL", 0),
            Subscription::new("2", "S", "100", "MAIL", 0),
            Subscription::new("3", "A", "900", "MAIL", 0),
            Subscription::new("4", " A ", "200", "mail", 0),
        ];
        let result = run(&subs);

        assert_eq!(result.skipped.inactive, 2);
        assert_eq!(result.skipped.unknown_publication, 1);
        assert_eq!(result.skipped.unknown_by_publication.get("XX"), Some(&1));
        assert!(result.get("TJ").is_none());
        assert_eq!(result.get("TA").unwrap().mail, 1);
        assert_eq!(result.rows_read, 4);
        assert_eq!(result.skipped.total() + result.total_active(), 4);
    }

    #[test]
    fn test_malformed_rows_counted_and_pass_continues() {
        let good = Subscription::new("1", "A", "100", "MAIL", 0);
        let bad = RowError::InvalidNumber {
            line: 3,
            field: "sp_vac_ind",
            value: "Y".to_string(),
        };
        let rows: Vec<Result<Subscription, RowError>> = vec![Err(bad), Ok(good)];

        let result = SubscriptionAggregator::new("A", tracked(&["TJ"])).aggregate_rows(
            rows.iter().map(|r| r.as_ref()),
            &catalog(),
            &vacations(),
            &DeliveryClassifier::new(),
            today(),
        );

        assert_eq!(result.skipped.malformed, 1);
        assert_eq!(result.total_active(), 1);
        assert_eq!(result.rows_read, 2);
    }

    #[test]
    fn test_invariants_hold_over_mixed_input() {
        let routes = ["MAIL", "INTERNET", "CARRIER", "MOTOR", "", "odd"];
        let mut subs = Vec::new();
        for i in 0..60u64 {
            let rate = if i % 3 == 0 { "100" } else if i % 3 == 1 { "101" } else { "200" };
            let vac = if i % 4 == 0 { 5 } else if i % 4 == 1 { 6 } else { 0 };
            subs.push(Subscription::new(&i.to_string(), "A", rate, routes[i as usize % routes.len()], vac));
        }
        let result = run(&subs);

        assert_eq!(result.total_active(), 60);
        for metrics in result.metrics.values() {
            assert!(metrics.is_consistent());
        }
        let on_vacation: u64 = result.metrics.values().map(|m| m.on_vacation).sum();
        assert_eq!(on_vacation, 15);
    }

    #[test]
    fn test_top_rates_ranking() {
        let mut metrics = EditionMetrics::default();
        for _ in 0..3 {
            metrics.record(DeliveryChannel::Mail, false, "101");
        }
        for _ in 0..3 {
            metrics.record(DeliveryChannel::Mail, false, "100");
        }
        metrics.record(DeliveryChannel::Carrier, true, "300");
        metrics.record(DeliveryChannel::Digital, false, "200");

        let top = metrics.top_rates(3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].rate_id, "100");
        assert_eq!(top[0].rank, 1);
        assert_eq!(top[0].percentage, 37.5);
        assert_eq!(top[1].rate_id, "101");
        assert_eq!(top[2].rate_id, "200");
        assert_eq!(top[2].percentage, 12.5);

        assert!(EditionMetrics::default().top_rates(10).is_empty());
    }
}
