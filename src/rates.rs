// 💲 Rate Catalog - billing-rate id → publication
// One entry per rate id. Duplicate ids overwrite silently (last seen wins),
// but the overwrite count is kept so the run can report it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// LENGTH UNIT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LengthUnit {
    Year,
    Month,
    Week,
    Day,
    /// Any code the export uses that we do not recognize (kept verbatim)
    Other(String),
}

impl LengthUnit {
    /// Parse a length-unit code ("Y", "m", "W", "D"); case-insensitive
    pub fn from_code(code: &str) -> Self {
        let code = code.trim();
        match code.to_ascii_uppercase().as_str() {
            "Y" => LengthUnit::Year,
            "M" => LengthUnit::Month,
            "W" => LengthUnit::Week,
            "D" => LengthUnit::Day,
            _ => LengthUnit::Other(code.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            LengthUnit::Year => "Y",
            LengthUnit::Month => "M",
            LengthUnit::Week => "W",
            LengthUnit::Day => "D",
            LengthUnit::Other(code) => code,
        }
    }

    /// Periods of this unit in one year; `None` means already annual
    pub fn periods_per_year(&self) -> Option<u32> {
        match self {
            LengthUnit::Year => None,
            LengthUnit::Month => Some(12),
            LengthUnit::Week => Some(52),
            LengthUnit::Day => Some(365),
            LengthUnit::Other(_) => None,
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// RATE RECORD
// ============================================================================

/// One row of the rate export
///
/// `price` and `length` are `None` when the export cell is blank or does not
/// parse. The catalog does not need them; the market-rate pass skips such rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub rate_id: String,
    pub publication: String,
    pub description: String,
    pub price: Option<Decimal>,
    pub length: Option<u32>,
    /// Length cell as exported (trimmed); used for the market-rate key
    #[serde(default)]
    pub length_text: String,
    /// Length-unit code exactly as exported (trimmed)
    pub unit_code: String,
}

impl RateRecord {
    pub fn new(rate_id: &str, publication: &str, description: &str) -> Self {
        RateRecord {
            rate_id: rate_id.trim().to_string(),
            publication: publication.trim().to_string(),
            description: description.trim().to_string(),
            price: None,
            length: None,
            length_text: String::new(),
            unit_code: String::new(),
        }
    }

    /// Builder pattern: add price and subscription term
    pub fn with_terms(mut self, price: Decimal, length: u32, unit_code: &str) -> Self {
        self.price = Some(price);
        self.length = Some(length);
        self.length_text = length.to_string();
        self.unit_code = unit_code.trim().to_string();
        self
    }

    pub fn unit(&self) -> LengthUnit {
        LengthUnit::from_code(&self.unit_code)
    }
}

/// Canonical form of an export key: numeric keys lose leading zeros
///
/// Used for rate ids and vacation subscriber keys alike, so "0100" and "100"
/// name the same thing.
pub fn normalize_key(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<u64>() {
        Ok(n) => n.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

// ============================================================================
// RATE CATALOG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateEntry {
    pub publication: String,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct RateCatalog {
    entries: HashMap<String, RateEntry>,
    overwritten: usize,
    excluded: usize,
}

impl RateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: &[RateRecord]) -> Self {
        let mut catalog = RateCatalog::new();
        for record in records {
            catalog.insert(record);
        }

        if catalog.overwritten > 0 {
            log::warn!(
                "Rate catalog: {} duplicate rate id(s) overwritten (last seen wins)",
                catalog.overwritten
            );
        }
        log::info!(
            "Rate catalog: {} rate ids, {} rows excluded",
            catalog.len(),
            catalog.excluded
        );

        catalog
    }

    /// Insert one record; a repeated rate id replaces the earlier entry
    pub fn insert(&mut self, record: &RateRecord) {
        let rate_id = normalize_key(&record.rate_id);
        let publication = record.publication.trim();

        if rate_id.is_empty() || publication.is_empty() {
            self.excluded += 1;
            return;
        }

        let entry = RateEntry {
            publication: publication.to_string(),
            description: record.description.trim().to_string(),
        };

        if self.entries.insert(rate_id, entry).is_some() {
            self.overwritten += 1;
        }
    }

    pub fn resolve(&self, rate_id: &str) -> Option<&RateEntry> {
        self.entries.get(&normalize_key(rate_id))
    }

    pub fn contains(&self, rate_id: &str) -> bool {
        self.resolve(rate_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows whose id had already been seen
    pub fn overwritten(&self) -> usize {
        self.overwritten
    }

    /// Rows with an empty rate id or publication code
    pub fn excluded(&self) -> usize {
        self.excluded
    }
}
