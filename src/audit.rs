// 🔍 Rate Audit - which active subscriptions fall out of the counts
// Every active subscription whose rate id has no catalog entry is absent
// from the snapshot. This lists those rate ids and how many subscribers
// each one drops, so a shrinking export is noticed.

use crate::aggregate::Subscription;
use crate::rates::{normalize_key, RateCatalog};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingRate {
    pub rate_id: String,
    pub subscribers: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateAudit {
    /// Ordered by subscriber count descending, then rate id
    pub missing: Vec<MissingRate>,
    pub found_rate_ids: usize,
    pub found_subscribers: u64,
    pub missing_subscribers: u64,
}

impl RateAudit {
    pub fn from_subscriptions<'a, I>(subscriptions: I, catalog: &RateCatalog, active_status: &str) -> Self
    where
        I: IntoIterator<Item = &'a Subscription>,
    {
        let active_status = active_status.trim();
        let mut missing: BTreeMap<String, u64> = BTreeMap::new();
        let mut found: BTreeSet<String> = BTreeSet::new();
        let mut found_subscribers = 0;

        for sub in subscriptions {
            if sub.status.trim() != active_status {
                continue;
            }
            let rate_id = normalize_key(&sub.rate_id);
            if catalog.contains(&rate_id) {
                found.insert(rate_id);
                found_subscribers += 1;
            } else {
                *missing.entry(rate_id).or_insert(0) += 1;
            }
        }

        Self::from_counts(missing, found.len(), found_subscribers)
    }

    /// Build from per-rate drop counts already collected by an aggregation pass
    pub fn from_counts(
        missing: BTreeMap<String, u64>,
        found_rate_ids: usize,
        found_subscribers: u64,
    ) -> Self {
        let missing_subscribers = missing.values().sum();

        let mut missing: Vec<MissingRate> = missing
            .into_iter()
            .map(|(rate_id, subscribers)| MissingRate { rate_id, subscribers })
            .collect();
        missing.sort_by(|a, b| {
            b.subscribers
                .cmp(&a.subscribers)
                .then_with(|| a.rate_id.cmp(&b.rate_id))
        });

        RateAudit {
            missing,
            found_rate_ids,
            found_subscribers,
            missing_subscribers,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rate ids missing from the rate export ({} subscribers dropped); {} rate ids found ({} subscribers counted)",
            self.missing.len(),
            self.missing_subscribers,
            self.found_rate_ids,
            self.found_subscribers
        )
    }
}
