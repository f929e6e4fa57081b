// ⚙️ Configuration - injected into every run
// Publications, header aliases, file locations and policies live here,
// loaded from a JSON file so nothing about a deployment is compiled in.

use crate::error::ConfigError;
use crate::vacation::VacationPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// PUBLICATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    /// Display name stored with each snapshot row
    pub name: String,

    /// Business-unit label (state or region)
    pub business_unit: String,

    /// Sold publications stay tracked but are left out of summary totals
    #[serde(default)]
    pub sold: bool,
}

impl Publication {
    pub fn new(name: &str, business_unit: &str) -> Self {
        Publication {
            name: name.to_string(),
            business_unit: business_unit.to_string(),
            sold: false,
        }
    }

    pub fn sold(mut self) -> Self {
        self.sold = true;
        self
    }
}

fn default_publications() -> BTreeMap<String, Publication> {
    let mut map = BTreeMap::new();
    map.insert("TJ".to_string(), Publication::new("The Journal", "South Carolina"));
    map.insert("TA".to_string(), Publication::new("The Advertiser", "Michigan"));
    map.insert("TR".to_string(), Publication::new("The Ranger", "Wyoming"));
    map.insert("LJ".to_string(), Publication::new("Lander Journal", "Wyoming"));
    map.insert("WRN".to_string(), Publication::new("Wind River News", "Wyoming"));
    map.insert("FN".to_string(), Publication::new("Fayette News", "Sold").sold());
    map
}

// ============================================================================
// COLUMN ALIASES
// ============================================================================
// Each field lists the header names it may appear under. The first alias
// present in the header row wins.

fn aliases(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateColumns {
    pub rate_id: Vec<String>,
    pub publication: Vec<String>,
    pub description: Vec<String>,
    pub length: Vec<String>,
    pub length_unit: Vec<String>,
    pub full_rate: Vec<String>,
}

impl Default for RateColumns {
    fn default() -> Self {
        RateColumns {
            rate_id: aliases(&["rr_code", "Sub Rate Id"]),
            publication: aliases(&["rr_edition", "Rate.rr Edition"]),
            description: aliases(&["rr_desc", "Rate.rr Online Desc"]),
            length: aliases(&["rr_length", "Rate.rr Length"]),
            length_unit: aliases(&[
                "rr_len_type",
                "Rate.rr Len Type(m=month,Y-year,W=week)",
            ]),
            full_rate: aliases(&["full_rate", "Full Rate"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionColumns {
    pub id: Vec<String>,
    pub status: Vec<String>,
    pub rate_id: Vec<String>,
    pub route: Vec<String>,
    pub vacation_indicator: Vec<String>,
}

impl Default for SubscriptionColumns {
    fn default() -> Self {
        SubscriptionColumns {
            id: aliases(&["sp_num"]),
            status: aliases(&["sp_stat"]),
            rate_id: aliases(&["sp_rate_id"]),
            route: aliases(&["sp_route"]),
            vacation_indicator: aliases(&["sp_vac_ind"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VacationColumns {
    pub subscriber: Vec<String>,
    pub begin: Vec<String>,
    pub end: Vec<String>,
}

impl Default for VacationColumns {
    fn default() -> Self {
        VacationColumns {
            subscriber: aliases(&["vd_sp_id"]),
            begin: aliases(&["vd_beg_date"]),
            end: aliases(&["vd_end_date"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub rates: RateColumns,
    pub subscriptions: SubscriptionColumns,
    pub vacations: VacationColumns,
}

// ============================================================================
// FILE LOCATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub rates: PathBuf,
    pub subscriptions: PathBuf,
    pub vacations: PathBuf,
    pub database: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig {
            rates: PathBuf::from("data/rates_latest.csv"),
            subscriptions: PathBuf::from("data/subscriptions_latest.csv"),
            vacations: PathBuf::from("data/vacations_latest.csv"),
            database: PathBuf::from("circulation.db"),
        }
    }
}

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

fn default_active_status() -> String {
    "A".to_string()
}

fn default_top_rates() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconConfig {
    #[serde(default = "default_publications")]
    pub publications: BTreeMap<String, Publication>,

    /// Status code marking an active subscription
    #[serde(default = "default_active_status")]
    pub active_status: String,

    /// How many rate ids per publication go into the rate distribution
    #[serde(default = "default_top_rates")]
    pub top_rates: usize,

    #[serde(default)]
    pub vacation_policy: VacationPolicy,

    #[serde(default)]
    pub columns: ColumnConfig,

    #[serde(default)]
    pub files: FileConfig,
}

impl Default for ReconConfig {
    fn default() -> Self {
        ReconConfig {
            publications: default_publications(),
            active_status: default_active_status(),
            top_rates: default_top_rates(),
            vacation_policy: VacationPolicy::default(),
            columns: ColumnConfig::default(),
            files: FileConfig::default(),
        }
    }
}

impl ReconConfig {
    /// Load and validate a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config = Self::from_json(&content)?;
        log::info!(
            "Loaded config from {:?} ({} publications)",
            path.as_ref(),
            config.publications.len()
        );
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: ReconConfig =
            serde_json::from_str(content).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Write this config as pretty JSON (used by `init-config`)
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.publications.is_empty() {
            return Err(ConfigError::NoPublications);
        }
        if self.top_rates == 0 {
            return Err(ConfigError::ZeroTopRates);
        }
        if self.active_status.trim().is_empty() {
            return Err(ConfigError::EmptyActiveStatus);
        }

        let rates = &self.columns.rates;
        let subs = &self.columns.subscriptions;
        let vacs = &self.columns.vacations;
        let checks: [(&'static str, &'static str, &Vec<String>); 14] = [
            ("rates", "rate_id", &rates.rate_id),
            ("rates", "publication", &rates.publication),
            ("rates", "description", &rates.description),
            ("rates", "length", &rates.length),
            ("rates", "length_unit", &rates.length_unit),
            ("rates", "full_rate", &rates.full_rate),
            ("subscriptions", "id", &subs.id),
            ("subscriptions", "status", &subs.status),
            ("subscriptions", "rate_id", &subs.rate_id),
            ("subscriptions", "route", &subs.route),
            ("subscriptions", "vacation_indicator", &subs.vacation_indicator),
            ("vacations", "subscriber", &vacs.subscriber),
            ("vacations", "begin", &vacs.begin),
            ("vacations", "end", &vacs.end),
        ];
        for (export, field, list) in checks {
            if list.is_empty() {
                return Err(ConfigError::EmptyAliases { export, field });
            }
        }

        Ok(())
    }

    pub fn publication(&self, code: &str) -> Option<&Publication> {
        self.publications.get(code)
    }

    pub fn is_tracked(&self, code: &str) -> bool {
        self.publications.contains_key(code)
    }

    pub fn tracked_codes(&self) -> BTreeSet<String> {
        self.publications.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ReconConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.active_status, "A");
        assert_eq!(config.top_rates, 10);
        assert_eq!(config.vacation_policy, VacationPolicy::OpenEnded);
        assert!(config.is_tracked("TJ"));
        assert!(config.publication("FN").unwrap().sold);
        assert!(!config.is_tracked("XX"));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{
            "publications": { "TJ": { "name": "The Journal", "business_unit": "South Carolina" } },
            "vacation_policy": "drop_open_ended",
            "files": { "database": "/tmp/circ.db" }
        }"#;

        let config = ReconConfig::from_json(json).unwrap();
        assert_eq!(config.publications.len(), 1);
        assert!(!config.publication("TJ").unwrap().sold);
        assert_eq!(config.vacation_policy, VacationPolicy::DropOpenEnded);
        assert_eq!(config.files.database, PathBuf::from("/tmp/circ.db"));
        assert_eq!(config.files.rates, PathBuf::from("data/rates_latest.csv"));
        assert_eq!(config.columns.rates.rate_id[0], "rr_code");
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let empty = r#"{ "publications": {} }"#;
        assert!(ReconConfig::from_json(empty).is_err());

        let mut config = ReconConfig::default();
        config.top_rates = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTopRates));

        let mut config = ReconConfig::default();
        config.columns.vacations.end.clear();
        assert_eq!(
            config.validate(),
            Err(ConfigError::EmptyAliases { export: "vacations", field: "end" })
        );
    }

    #[test]
    fn test_write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recon.json");

        let config = ReconConfig::default();
        config.write_to(&path).unwrap();

        let reloaded = ReconConfig::from_file(&path).unwrap();
        assert_eq!(reloaded, config);
    }
}
