// ⚖️ Reconciliation Engine - one daily run, end to end
// Parse the three exports, build the rate catalog and vacation index,
// aggregate subscriptions, compute market rates, then store the snapshot.
//
// Store writes are all-or-nothing. Every attempt (success or failure)
// is appended to import_log.

use crate::aggregate::{AggregationResult, Subscription, SubscriptionAggregator};
use crate::audit::RateAudit;
use crate::config::ReconConfig;
use crate::db::{self, ImportLogEntry, RateDistributionRow, SnapshotRow, SnapshotWrite};
use crate::delivery::{ChannelClassifier, DeliveryClassifier};
use crate::market::{MarketRateCalculator, MarketRateTable};
use crate::parser::{
    ExportParser, ParsedExport, RateExportParser, SubscriptionExportParser, VacationExportParser,
};
use crate::rates::{RateCatalog, RateRecord};
use crate::vacation::{VacationIndex, VacationRecord};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

// ============================================================================
// INPUTS
// ============================================================================

/// The three parsed exports of one run
#[derive(Debug, Clone)]
pub struct ExportSet {
    pub rates: ParsedExport<RateRecord>,
    pub subscriptions: ParsedExport<Subscription>,
    pub vacations: ParsedExport<VacationRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputHashes {
    pub rates: Option<String>,
    pub subscriptions: Option<String>,
    pub vacations: Option<String>,
}

impl ExportSet {
    pub fn hashes(&self) -> InputHashes {
        InputHashes {
            rates: self.rates.file_hash.clone(),
            subscriptions: self.subscriptions.file_hash.clone(),
            vacations: self.vacations.file_hash.clone(),
        }
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// Totals across publications that are still owned (sold ones left out)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CirculationTotals {
    pub publications: usize,
    pub total_active: u64,
    pub on_vacation: u64,
    pub deliverable: u64,
    pub mail: u64,
    pub carrier: u64,
    pub digital: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputStats {
    pub rate_rows: usize,
    pub rate_rows_rejected: usize,
    pub catalog_entries: usize,
    pub catalog_overwritten: usize,
    pub catalog_excluded: usize,
    pub vacation_rows: usize,
    pub vacation_rows_rejected: usize,
    pub vacation_intervals: usize,
    pub vacation_intervals_dropped: usize,
    pub vacations_active: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub run_id: String,
    pub snapshot_date: NaiveDate,
    pub aggregation: AggregationResult,
    pub market_rates: MarketRateTable,
    pub audit: RateAudit,
    pub totals: CirculationTotals,
    pub inputs: InputStats,
    pub hashes: InputHashes,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    /// One row per publication that had active subscriptions
    pub fn snapshot_rows(&self, config: &ReconConfig) -> Vec<SnapshotRow> {
        self.aggregation
            .metrics
            .iter()
            .map(|(code, m)| {
                let (name, unit) = config
                    .publication(code)
                    .map(|p| (p.name.clone(), p.business_unit.clone()))
                    .unwrap_or_else(|| (code.clone(), String::new()));

                SnapshotRow {
                    snapshot_date: self.snapshot_date,
                    paper_code: code.clone(),
                    paper_name: name,
                    business_unit: unit,
                    total_active: m.total_active,
                    on_vacation: m.on_vacation,
                    deliverable: m.deliverable,
                    mail_delivery: m.mail,
                    carrier_delivery: m.carrier,
                    digital_only: m.digital,
                }
            })
            .collect()
    }

    pub fn distribution_rows(&self, top_rates: usize) -> Vec<RateDistributionRow> {
        self.aggregation
            .metrics
            .iter()
            .flat_map(|(code, m)| {
                m.top_rates(top_rates)
                    .into_iter()
                    .map(move |share| RateDistributionRow {
                        snapshot_date: self.snapshot_date,
                        paper_code: code.clone(),
                        rank_position: share.rank,
                        rate_id: share.rate_id,
                        subscriber_count: share.subscriber_count,
                        percentage: share.percentage,
                    })
            })
            .collect()
    }

    pub fn import_log_entry(&self, status: &str, notes: &str) -> ImportLogEntry {
        let skipped = &self.aggregation.skipped;
        ImportLogEntry {
            run_id: self.run_id.clone(),
            import_date: self.reconciled_at,
            snapshot_date: self.snapshot_date,
            records_processed: self.aggregation.rows_read,
            skipped_inactive: skipped.inactive,
            skipped_malformed: skipped.malformed,
            skipped_unresolved: skipped.unresolved_rate,
            skipped_unknown_publication: skipped.unknown_publication,
            status: status.to_string(),
            notes: notes.to_string(),
            rates_hash: self.hashes.rates.clone(),
            subscriptions_hash: self.hashes.subscriptions.clone(),
            vacations_hash: self.hashes.vacations.clone(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Snapshot {}: {} active across {} publications ({} deliverable, {} on vacation); {} rows skipped, {} market rates",
            self.snapshot_date,
            self.totals.total_active,
            self.totals.publications,
            self.totals.deliverable,
            self.totals.on_vacation,
            self.aggregation.skipped.total(),
            self.market_rates.len()
        )
    }
}

fn totals(aggregation: &AggregationResult, config: &ReconConfig) -> CirculationTotals {
    let mut totals = CirculationTotals::default();

    for (code, m) in &aggregation.metrics {
        if config.publication(code).map_or(false, |p| p.sold) {
            continue;
        }
        totals.publications += 1;
        totals.total_active += m.total_active;
        totals.on_vacation += m.on_vacation;
        totals.deliverable += m.deliverable;
        totals.mail += m.mail;
        totals.carrier += m.carrier;
        totals.digital += m.digital;
    }

    totals
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    config: ReconConfig,
    classifier: Box<dyn ChannelClassifier>,
}

impl ReconciliationEngine {
    pub fn new(config: ReconConfig) -> Self {
        ReconciliationEngine {
            config,
            classifier: Box::new(DeliveryClassifier::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn ChannelClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    /// Parse all three exports from the configured paths
    pub fn load_exports(&self) -> Result<ExportSet> {
        let files = &self.config.files;
        let columns = &self.config.columns;

        let rates = RateExportParser::new(columns.rates.clone()).parse_file(&files.rates)?;
        let subscriptions = SubscriptionExportParser::new(columns.subscriptions.clone())
            .parse_file(&files.subscriptions)?;
        let vacations =
            VacationExportParser::new(columns.vacations.clone()).parse_file(&files.vacations)?;

        Ok(ExportSet {
            rates,
            subscriptions,
            vacations,
        })
    }

    /// Pure computation over parsed exports; nothing is written
    pub fn reconcile(&self, exports: &ExportSet, snapshot_date: NaiveDate) -> ReconciliationReport {
        let rate_records: Vec<RateRecord> = exports.rates.records().cloned().collect();
        let vacation_records: Vec<VacationRecord> = exports.vacations.records().cloned().collect();

        let catalog = RateCatalog::from_records(&rate_records);
        let vacations = VacationIndex::build(&vacation_records, self.config.vacation_policy);

        let aggregation = SubscriptionAggregator::from_config(&self.config).aggregate_rows(
            exports.subscriptions.rows.iter().map(|r| r.as_ref()),
            &catalog,
            &vacations,
            self.classifier.as_ref(),
            snapshot_date,
        );

        let market_rates = MarketRateCalculator::new().compute(&rate_records);
        let audit = RateAudit::from_subscriptions(
            exports.subscriptions.records(),
            &catalog,
            &self.config.active_status,
        );

        let inputs = InputStats {
            rate_rows: exports.rates.len(),
            rate_rows_rejected: exports.rates.rejected_count(),
            catalog_entries: catalog.len(),
            catalog_overwritten: catalog.overwritten(),
            catalog_excluded: catalog.excluded(),
            vacation_rows: exports.vacations.len(),
            vacation_rows_rejected: exports.vacations.rejected_count(),
            vacation_intervals: vacations.interval_count(),
            vacation_intervals_dropped: vacations.dropped(),
            vacations_active: vacations.active_subscriber_count(snapshot_date),
        };

        for (code, m) in &aggregation.metrics {
            if !m.is_consistent() {
                log::error!("Inconsistent counters for {}: {:?}", code, m);
            }
        }

        ReconciliationReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            snapshot_date,
            totals: totals(&aggregation, &self.config),
            aggregation,
            market_rates,
            audit,
            inputs,
            hashes: exports.hashes(),
            reconciled_at: Utc::now(),
        }
    }

    /// Replace the stored snapshot for the report's date and log the run
    pub fn persist(&self, conn: &mut Connection, report: &ReconciliationReport) -> Result<SnapshotWrite> {
        let snapshots = report.snapshot_rows(&self.config);
        let distribution = report.distribution_rows(self.config.top_rates);

        let notes = format!(
            "{} publications, {} distribution rows, {} market rates",
            snapshots.len(),
            distribution.len(),
            report.market_rates.len()
        );
        let success = report.import_log_entry("success", &notes);

        // The success log row commits with the snapshot or not at all
        match db::write_snapshot(
            conn,
            report.snapshot_date,
            &snapshots,
            &distribution,
            Some(&report.market_rates),
            Some(&success),
        ) {
            Ok(written) => Ok(written),
            Err(e) => {
                let entry = report.import_log_entry("failed", &format!("{:#}", e));
                if let Err(log_err) = db::insert_import_log(conn, &entry) {
                    log::error!("Could not record failed import: {:#}", log_err);
                }
                Err(e.context(format!("Failed to store snapshot {}", report.snapshot_date)))
            }
        }
    }

    /// Full daily run: parse, reconcile and (unless `dry_run`) store
    pub fn run(
        &self,
        conn: &mut Connection,
        snapshot_date: NaiveDate,
        dry_run: bool,
    ) -> Result<ReconciliationReport> {
        let exports = match self.load_exports() {
            Ok(exports) => exports,
            Err(e) => {
                if !dry_run {
                    self.log_failure(conn, snapshot_date, &e);
                }
                return Err(e);
            }
        };

        let report = self.reconcile(&exports, snapshot_date);
        log::info!("{}", report.summary());

        if dry_run {
            log::info!("Dry run: nothing written");
        } else {
            self.persist(conn, &report)?;
        }

        Ok(report)
    }

    /// Unresolved-rate audit over the configured exports
    pub fn audit(&self) -> Result<RateAudit> {
        let columns = &self.config.columns;
        let files = &self.config.files;

        let rates = RateExportParser::new(columns.rates.clone()).parse_file(&files.rates)?;
        let subscriptions = SubscriptionExportParser::new(columns.subscriptions.clone())
            .parse_file(&files.subscriptions)?;

        let rate_records: Vec<RateRecord> = rates.records().cloned().collect();
        let catalog = RateCatalog::from_records(&rate_records);

        Ok(RateAudit::from_subscriptions(
            subscriptions.records(),
            &catalog,
            &self.config.active_status,
        ))
    }

    fn log_failure(&self, conn: &Connection, snapshot_date: NaiveDate, err: &anyhow::Error) {
        let entry = ImportLogEntry {
            run_id: uuid::Uuid::new_v4().to_string(),
            import_date: Utc::now(),
            snapshot_date,
            records_processed: 0,
            skipped_inactive: 0,
            skipped_malformed: 0,
            skipped_unresolved: 0,
            skipped_unknown_publication: 0,
            status: "failed".to_string(),
            notes: format!("{:#}", err),
            rates_hash: None,
            subscriptions_hash: None,
            vacations_hash: None,
        };

        if let Err(log_err) = db::insert_import_log(conn, &entry) {
            log::error!("Could not record failed import: {:#}", log_err);
        }
    }
}
