// 📈 Market Rates - highest price per publication and subscription length
// Comps and promotions (price <= 0) never set or raise a market rate.
// A stored entry is only replaced by a STRICTLY higher price; ties keep the
// first row seen, including its description and annualized value.

use crate::rates::{LengthUnit, RateRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

// ============================================================================
// NORMALIZATION
// ============================================================================

/// "12" + "M" → "12 M"
pub fn normalize_length(length: &str, unit_code: &str) -> String {
    format!("{} {}", length.trim(), unit_code.trim())
}

/// Scale a price for `length` units to a yearly figure
///
/// Year ×1, Month ×12/len, Week ×52/len, Day ×365/len.
/// Unrecognized units are taken as already annual.
pub fn annualize(rate: Decimal, length: u32, unit: &LengthUnit) -> Decimal {
    match unit.periods_per_year() {
        Some(periods) if length > 0 => rate * Decimal::from(periods) / Decimal::from(length),
        _ => rate,
    }
}

// ============================================================================
// MARKET RATE ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRateEntry {
    pub publication: String,
    /// Normalized length, e.g. "12 M"
    pub length: String,
    pub rate: Decimal,
    pub description: String,
    pub annualized: Decimal,
}

// ============================================================================
// MARKET RATE TABLE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRateStats {
    pub rows: usize,
    /// Price zero or negative
    pub non_positive: usize,
    /// No publication, price or length
    pub incomplete: usize,
    /// Times a stored maximum was raised
    pub raised: usize,
}

/// publication → normalized length → entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRateTable {
    by_publication: BTreeMap<String, BTreeMap<String, MarketRateEntry>>,
    pub stats: MarketRateStats,
}

impl MarketRateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate; returns true when it was stored
    pub fn offer(&mut self, candidate: MarketRateEntry) -> bool {
        let lengths = self
            .by_publication
            .entry(candidate.publication.clone())
            .or_insert_with(BTreeMap::new);

        match lengths.entry(candidate.length.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(candidate);
                true
            }
            Entry::Occupied(mut slot) => {
                if candidate.rate > slot.get().rate {
                    slot.insert(candidate);
                    self.stats.raised += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn get(&self, publication: &str, length: &str) -> Option<&MarketRateEntry> {
        self.by_publication.get(publication)?.get(length)
    }

    pub fn for_publication(&self, publication: &str) -> Vec<&MarketRateEntry> {
        self.by_publication
            .get(publication)
            .map(|lengths| lengths.values().collect())
            .unwrap_or_default()
    }

    /// All entries, ordered by publication then length
    pub fn entries(&self) -> impl Iterator<Item = &MarketRateEntry> {
        self.by_publication.values().flat_map(|lengths| lengths.values())
    }

    pub fn len(&self) -> usize {
        self.by_publication.values().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// CALCULATOR
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct MarketRateCalculator;

impl MarketRateCalculator {
    pub fn new() -> Self {
        MarketRateCalculator
    }

    pub fn compute(&self, records: &[RateRecord]) -> MarketRateTable {
        let mut table = MarketRateTable::new();

        for record in records {
            table.stats.rows += 1;

            let publication = record.publication.trim();
            let (price, length) = match (record.price, record.length) {
                (Some(price), Some(length)) if !publication.is_empty() && length > 0 => {
                    (price, length)
                }
                _ => {
                    table.stats.incomplete += 1;
                    continue;
                }
            };

            if price <= Decimal::ZERO {
                table.stats.non_positive += 1;
                continue;
            }

            table.offer(MarketRateEntry {
                publication: publication.to_string(),
                length: normalize_length(&record.length_text, &record.unit_code),
                rate: price,
                description: record.description.trim().to_string(),
                annualized: annualize(price, length, &record.unit()),
            });
        }

        log::info!(
            "Market rates: {} entries across {} publications ({} non-positive, {} incomplete rows)",
            table.len(),
            table.by_publication.len(),
            table.stats.non_positive,
            table.stats.incomplete
        );

        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rate(id: &str, publication: &str, desc: &str, price: Decimal, length: u32, unit: &str) -> RateRecord {
        RateRecord::new(id, publication, desc).with_terms(price, length, unit)
    }

    #[test]
    fn test_annualization_by_unit() {
        assert_eq!(annualize(dec!(10), 1, &LengthUnit::Month), dec!(120));
        assert_eq!(annualize(dec!(10), 52, &LengthUnit::Week), dec!(10));
        assert_eq!(annualize(dec!(10), 1, &LengthUnit::Year), dec!(10));
        assert_eq!(annualize(dec!(10), 2, &LengthUnit::Year), dec!(10));
        assert_eq!(annualize(dec!(1), 5, &LengthUnit::Day), dec!(73));
        assert_eq!(annualize(dec!(10), 3, &LengthUnit::Other("Q".into())), dec!(10));
    }

    #[test]
    fn test_normalize_length() {
        assert_eq!(normalize_length(" 12", "M "), "12 M");
        assert_eq!(normalize_length("1", "Y"), "1 Y");
    }

    #[test]
    fn test_maximum_wins_per_key() {
        let records = vec![
            rate("1", "TJ", "TJ 12M basic", dec!(100), 12, "M"),
            rate("2", "TJ", "TJ 12M premium", dec!(150), 12, "M"),
            rate("3", "TJ", "TJ 12M old", dec!(120), 12, "M"),
            rate("4", "TJ", "TJ 1Y", dec!(90), 1, "Y"),
            rate("5", "TA", "TA 12M", dec!(80), 12, "M"),
        ];
        let table = MarketRateCalculator::new().compute(&records);

        assert_eq!(table.len(), 3);
        let tj = table.get("TJ", "12 M").unwrap();
        assert_eq!(tj.rate, dec!(150));
        assert_eq!(tj.description, "TJ 12M premium");
        assert_eq!(tj.annualized, dec!(150));
        assert_eq!(table.stats.raised, 1);
        assert_eq!(table.get("TA", "12 M").unwrap().rate, dec!(80));
        assert_eq!(table.for_publication("TJ").len(), 2);
    }

    #[test]
    fn test_length_key_uses_exported_text() {
        let mut padded = RateRecord::new("1", "TJ", "padded length");
        padded.price = Some(dec!(30));
        padded.length = Some(12);
        padded.length_text = "012".to_string();
        padded.unit_code = "M".to_string();

        let table = MarketRateCalculator::new().compute(&[padded]);

        assert!(table.get("TJ", "012 M").is_some());
        assert!(table.get("TJ", "12 M").is_none());
        assert_eq!(table.get("TJ", "012 M").unwrap().annualized, dec!(30));
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let records = vec![
            rate("1", "TJ", "first", dec!(50), 26, "W"),
            rate("2", "TJ", "second", dec!(50), 26, "W"),
        ];
        let table = MarketRateCalculator::new().compute(&records);

        let entry = table.get("TJ", "26 W").unwrap();
        assert_eq!(entry.description, "first");
        assert_eq!(entry.annualized, dec!(100));
        assert_eq!(table.stats.raised, 0);
    }

    #[test]
    fn test_non_positive_rates_never_stored() {
        let records = vec![
            rate("1", "TJ", "comp", dec!(0), 12, "M"),
            rate("2", "TJ", "refund", dec!(-5), 12, "M"),
            rate("3", "TR", "free trial", dec!(0), 4, "W"),
        ];
        let table = MarketRateCalculator::new().compute(&records);

        assert!(table.is_empty());
        assert_eq!(table.stats.non_positive, 3);
        assert!(table.get("TR", "4 W").is_none());
    }

    #[test]
    fn test_comp_does_not_shadow_later_paid_rate() {
        let records = vec![
            rate("1", "TJ", "comp", dec!(0), 12, "M"),
            rate("2", "TJ", "paid", dec!(9.99), 12, "M"),
        ];
        let table = MarketRateCalculator::new().compute(&records);

        let entry = table.get("TJ", "12 M").unwrap();
        assert_eq!(entry.rate, dec!(9.99));
        assert_eq!(entry.description, "paid");
    }

    #[test]
    fn test_incomplete_rows_skipped() {
        let records = vec![
            RateRecord::new("1", "TJ", "no terms"),
            rate("2", "", "no paper", dec!(10), 1, "Y"),
            rate("3", "TJ", "zero length", dec!(10), 0, "M"),
        ];
        let table = MarketRateCalculator::new().compute(&records);

        assert!(table.is_empty());
        assert_eq!(table.stats.incomplete, 3);
        assert_eq!(table.stats.rows, 3);
    }

    #[test]
    fn test_stored_rate_is_true_maximum() {
        let prices = [dec!(12.50), dec!(3), dec!(19.99), dec!(0), dec!(19.98), dec!(7)];
        let records: Vec<RateRecord> = prices
            .iter()
            .enumerate()
            .map(|(i, p)| rate(&i.to_string(), "LJ", &format!("r{}", i), *p, 1, "M"))
            .collect();
        let table = MarketRateCalculator::new().compute(&records);

        let entry = table.get("LJ", "1 M").unwrap();
        assert_eq!(entry.rate, dec!(19.99));
        assert_eq!(entry.annualized, dec!(239.88));
        assert!(table.entries().all(|e| e.rate > Decimal::ZERO));
    }
}
