use crate::market::{MarketRateEntry, MarketRateTable};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One publication's counts for one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub snapshot_date: NaiveDate,
    pub paper_code: String,
    pub paper_name: String,
    pub business_unit: String,
    pub total_active: u64,
    pub on_vacation: u64,
    pub deliverable: u64,
    pub mail_delivery: u64,
    pub carrier_delivery: u64,
    pub digital_only: u64,
}

/// One ranked rate id within a publication's distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateDistributionRow {
    pub snapshot_date: NaiveDate,
    pub paper_code: String,
    pub rank_position: usize,
    pub rate_id: String,
    pub subscriber_count: u64,
    pub percentage: f64,
}

/// Run record appended after every import attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportLogEntry {
    pub run_id: String,
    pub import_date: DateTime<Utc>,
    pub snapshot_date: NaiveDate,
    pub records_processed: u64,
    pub skipped_inactive: u64,
    pub skipped_malformed: u64,
    pub skipped_unresolved: u64,
    pub skipped_unknown_publication: u64,
    /// "success" or "failed"
    pub status: String,
    pub notes: String,
    pub rates_hash: Option<String>,
    pub subscriptions_hash: Option<String>,
    pub vacations_hash: Option<String>,
}

impl ImportLogEntry {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Rows written by one snapshot transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotWrite {
    pub snapshots: usize,
    pub distribution: usize,
    pub market_rates: usize,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Daily snapshot (one row per date + publication)
    // No surrogate ids or timestamps: re-running a date rewrites identical rows
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_snapshots (
            snapshot_date TEXT NOT NULL,
            paper_code TEXT NOT NULL,
            paper_name TEXT NOT NULL,
            business_unit TEXT NOT NULL,
            total_active INTEGER NOT NULL,
            on_vacation INTEGER NOT NULL,
            deliverable INTEGER NOT NULL,
            mail_delivery INTEGER NOT NULL,
            carrier_delivery INTEGER NOT NULL,
            digital_only INTEGER NOT NULL,
            PRIMARY KEY (snapshot_date, paper_code)
        )",
        [],
    )?;

    // ==========================================================================
    // Rate distribution (top rate ids per publication per date)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rate_distribution (
            snapshot_date TEXT NOT NULL,
            paper_code TEXT NOT NULL,
            rank_position INTEGER NOT NULL,
            rate_id TEXT NOT NULL,
            subscriber_count INTEGER NOT NULL,
            percentage REAL NOT NULL,
            PRIMARY KEY (snapshot_date, paper_code, rank_position)
        )",
        [],
    )?;

    // ==========================================================================
    // Market rates (amounts as 2-decimal text)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rate_structure (
            paper_code TEXT NOT NULL,
            subscription_length TEXT NOT NULL,
            market_rate TEXT NOT NULL,
            rate_name TEXT,
            annualized_rate TEXT NOT NULL,
            UNIQUE (paper_code, subscription_length)
        )",
        [],
    )?;

    // ==========================================================================
    // Import log (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            import_date TEXT NOT NULL,
            snapshot_date TEXT NOT NULL,
            records_processed INTEGER NOT NULL,
            skipped_inactive INTEGER NOT NULL DEFAULT 0,
            skipped_malformed INTEGER NOT NULL DEFAULT 0,
            skipped_unresolved INTEGER NOT NULL DEFAULT 0,
            skipped_unknown_publication INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            notes TEXT,
            rates_hash TEXT,
            subscriptions_hash TEXT,
            vacations_hash TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rate_structure_paper ON rate_structure(paper_code)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_import_log_snapshot ON import_log(snapshot_date)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// WRITES
// ============================================================================

/// Replace everything stored for `snapshot_date` in one transaction
///
/// Deletes the date's snapshot and distribution rows, inserts the new ones,
/// and (when given) replaces the whole market-rate table and appends the
/// run's import-log row. Every row is stored under `snapshot_date`. Any error
/// rolls the transaction back, leaving the previous snapshot untouched.
pub fn write_snapshot(
    conn: &mut Connection,
    snapshot_date: NaiveDate,
    snapshots: &[SnapshotRow],
    distribution: &[RateDistributionRow],
    market_rates: Option<&MarketRateTable>,
    import_log: Option<&ImportLogEntry>,
) -> Result<SnapshotWrite> {
    let date = date_str(snapshot_date);
    let tx = conn.transaction().context("Failed to begin snapshot transaction")?;
    let mut written = SnapshotWrite::default();

    tx.execute("DELETE FROM daily_snapshots WHERE snapshot_date = ?1", params![date])?;
    tx.execute("DELETE FROM rate_distribution WHERE snapshot_date = ?1", params![date])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO daily_snapshots (
                snapshot_date, paper_code, paper_name, business_unit,
                total_active, on_vacation, deliverable,
                mail_delivery, carrier_delivery, digital_only
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;

        for row in snapshots {
            stmt.execute(params![
                date,
                row.paper_code,
                row.paper_name,
                row.business_unit,
                row.total_active as i64,
                row.on_vacation as i64,
                row.deliverable as i64,
                row.mail_delivery as i64,
                row.carrier_delivery as i64,
                row.digital_only as i64,
            ])
            .with_context(|| format!("Failed to insert snapshot for {}", row.paper_code))?;
            written.snapshots += 1;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO rate_distribution (
                snapshot_date, paper_code, rank_position, rate_id, subscriber_count, percentage
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;

        for row in distribution {
            stmt.execute(params![
                date,
                row.paper_code,
                row.rank_position as i64,
                row.rate_id,
                row.subscriber_count as i64,
                row.percentage,
            ])
            .with_context(|| {
                format!(
                    "Failed to insert rate distribution {} #{}",
                    row.paper_code, row.rank_position
                )
            })?;
            written.distribution += 1;
        }
    }

    if let Some(table) = market_rates {
        written.market_rates = replace_market_rates(&tx, table)?;
    }

    if let Some(entry) = import_log {
        insert_import_log(&tx, entry).context("Failed to append import log")?;
    }

    tx.commit().context("Failed to commit snapshot transaction")?;

    log::info!(
        "Stored snapshot {}: {} publications, {} distribution rows, {} market rates",
        date,
        written.snapshots,
        written.distribution,
        written.market_rates
    );

    Ok(written)
}

fn replace_market_rates(conn: &Connection, table: &MarketRateTable) -> Result<usize> {
    conn.execute("DELETE FROM rate_structure", [])?;

    let mut stmt = conn.prepare(
        "INSERT INTO rate_structure (
            paper_code, subscription_length, market_rate, rate_name, annualized_rate
        ) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;

    let mut inserted = 0;
    for entry in table.entries() {
        stmt.execute(params![
            entry.publication,
            entry.length,
            money(entry.rate),
            entry.description,
            money(entry.annualized),
        ])?;
        inserted += 1;
    }

    Ok(inserted)
}

pub fn insert_import_log(conn: &Connection, entry: &ImportLogEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO import_log (
            run_id, import_date, snapshot_date, records_processed,
            skipped_inactive, skipped_malformed, skipped_unresolved, skipped_unknown_publication,
            status, notes, rates_hash, subscriptions_hash, vacations_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            entry.run_id,
            entry.import_date.to_rfc3339(),
            date_str(entry.snapshot_date),
            entry.records_processed as i64,
            entry.skipped_inactive as i64,
            entry.skipped_malformed as i64,
            entry.skipped_unresolved as i64,
            entry.skipped_unknown_publication as i64,
            entry.status,
            entry.notes,
            entry.rates_hash,
            entry.subscriptions_hash,
            entry.vacations_hash,
        ],
    )?;

    Ok(())
}

// ============================================================================
// READS
// ============================================================================

pub fn get_snapshots_for_date(conn: &Connection, snapshot_date: NaiveDate) -> Result<Vec<SnapshotRow>> {
    let mut stmt = conn.prepare(
        "SELECT snapshot_date, paper_code, paper_name, business_unit,
                total_active, on_vacation, deliverable,
                mail_delivery, carrier_delivery, digital_only
         FROM daily_snapshots
         WHERE snapshot_date = ?1
         ORDER BY paper_code",
    )?;

    let rows = stmt
        .query_map(params![date_str(snapshot_date)], |row| {
            Ok(SnapshotRow {
                snapshot_date: parse_date_column(row, 0)?,
                paper_code: row.get(1)?,
                paper_name: row.get(2)?,
                business_unit: row.get(3)?,
                total_active: row.get::<_, i64>(4)? as u64,
                on_vacation: row.get::<_, i64>(5)? as u64,
                deliverable: row.get::<_, i64>(6)? as u64,
                mail_delivery: row.get::<_, i64>(7)? as u64,
                carrier_delivery: row.get::<_, i64>(8)? as u64,
                digital_only: row.get::<_, i64>(9)? as u64,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub fn get_rate_distribution(
    conn: &Connection,
    snapshot_date: NaiveDate,
    paper_code: &str,
) -> Result<Vec<RateDistributionRow>> {
    let mut stmt = conn.prepare(
        "SELECT snapshot_date, paper_code, rank_position, rate_id, subscriber_count, percentage
         FROM rate_distribution
         WHERE snapshot_date = ?1 AND paper_code = ?2
         ORDER BY rank_position",
    )?;

    let rows = stmt
        .query_map(params![date_str(snapshot_date), paper_code], |row| {
            Ok(RateDistributionRow {
                snapshot_date: parse_date_column(row, 0)?,
                paper_code: row.get(1)?,
                rank_position: row.get::<_, i64>(2)? as usize,
                rate_id: row.get(3)?,
                subscriber_count: row.get::<_, i64>(4)? as u64,
                percentage: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Stored market rates, optionally for one publication
pub fn get_market_rates(conn: &Connection, paper_code: Option<&str>) -> Result<Vec<MarketRateEntry>> {
    let mut stmt = conn.prepare(
        "SELECT paper_code, subscription_length, market_rate, rate_name, annualized_rate
         FROM rate_structure
         WHERE ?1 IS NULL OR paper_code = ?1
         ORDER BY paper_code, subscription_length",
    )?;

    let rows = stmt
        .query_map(params![paper_code], |row| {
            Ok(MarketRateEntry {
                publication: row.get(0)?,
                length: row.get(1)?,
                rate: parse_decimal_column(row, 2)?,
                description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                annualized: parse_decimal_column(row, 4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Most recent import runs first
pub fn get_import_log(conn: &Connection, limit: usize) -> Result<Vec<ImportLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, import_date, snapshot_date, records_processed,
                skipped_inactive, skipped_malformed, skipped_unresolved, skipped_unknown_publication,
                status, notes, rates_hash, subscriptions_hash, vacations_hash
         FROM import_log
         ORDER BY id DESC
         LIMIT ?1",
    )?;

    let entries = stmt
        .query_map(params![limit as i64], |row| {
            let import_date_str: String = row.get(1)?;
            let import_date = DateTime::parse_from_rfc3339(&import_date_str)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                .with_timezone(&Utc);

            Ok(ImportLogEntry {
                run_id: row.get(0)?,
                import_date,
                snapshot_date: parse_date_column(row, 2)?,
                records_processed: row.get::<_, i64>(3)? as u64,
                skipped_inactive: row.get::<_, i64>(4)? as u64,
                skipped_malformed: row.get::<_, i64>(5)? as u64,
                skipped_unresolved: row.get::<_, i64>(6)? as u64,
                skipped_unknown_publication: row.get::<_, i64>(7)? as u64,
                status: row.get(8)?,
                notes: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
                rates_hash: row.get(10)?,
                subscriptions_hash: row.get(11)?,
                vacations_hash: row.get(12)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Latest date that has a stored snapshot
pub fn latest_snapshot_date(conn: &Connection) -> Result<Option<NaiveDate>> {
    let latest: Option<String> = conn
        .query_row("SELECT MAX(snapshot_date) FROM daily_snapshots", [], |row| {
            row.get::<_, Option<String>>(0)
        })
        .optional()?
        .flatten();

    latest
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").context("Bad snapshot_date in store"))
        .transpose()
}

pub fn count_snapshots(conn: &Connection, snapshot_date: NaiveDate) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM daily_snapshots WHERE snapshot_date = ?1",
        params![date_str(snapshot_date)],
        |row| row.get(0),
    )?;

    Ok(count)
}

// ============================================================================
// HELPERS
// ============================================================================

fn date_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Two decimal places, always printed ("120" → "120.00"); halves round away from zero
pub fn money(value: Decimal) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

fn parse_date_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_decimal_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let s: String = row.get(idx)?;
    Decimal::from_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
