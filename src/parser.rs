// 🏗️ Export Parsers - rates, subscriptions, vacations
// Columns are found by header name (aliases from config), never by position.
// A missing column fails the whole file; a bad row only rejects that row.

use crate::aggregate::Subscription;
use crate::config::{RateColumns, SubscriptionColumns, VacationColumns};
use crate::error::{ExportError, RowError};
use crate::rates::RateRecord;
use crate::vacation::VacationRecord;
use anyhow::{Context, Result};
use csv::StringRecord;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// PARSED EXPORT
// ============================================================================

/// Rows of one export in file order; rejected rows keep their reason
#[derive(Debug, Clone)]
pub struct ParsedExport<T> {
    pub rows: Vec<Result<T, RowError>>,
    /// SHA-256 of the file contents (hex), when parsed from a file
    pub file_hash: Option<String>,
}

impl<T> ParsedExport<T> {
    pub fn records(&self) -> impl Iterator<Item = &T> {
        self.rows.iter().filter_map(|r| r.as_ref().ok())
    }

    pub fn rejected(&self) -> impl Iterator<Item = &RowError> {
        self.rows.iter().filter_map(|r| r.as_ref().err())
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected().count()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Accepted records only, in file order
    pub fn into_records(self) -> Vec<T> {
        self.rows.into_iter().filter_map(|r| r.ok()).collect()
    }
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

pub trait ExportParser {
    type Record;

    /// Name used in errors and logs ("rates", "subscriptions", ...)
    fn export_name(&self) -> &'static str;

    /// Map header positions, then turn each data row into a record
    fn parse_reader<R: Read>(&self, reader: R) -> Result<ParsedExport<Self::Record>>;

    /// Parse a file and remember its content hash for the import log
    fn parse_file(&self, path: &Path) -> Result<ParsedExport<Self::Record>> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read {} export: {:?}", self.export_name(), path))?;

        let mut parsed = self
            .parse_reader(bytes.as_slice())
            .with_context(|| format!("Failed to parse {} export: {:?}", self.export_name(), path))?;
        parsed.file_hash = Some(hash_bytes(&bytes));

        log::info!(
            "Parsed {} export {:?}: {} rows, {} rejected",
            self.export_name(),
            path,
            parsed.len(),
            parsed.rejected_count()
        );

        Ok(parsed)
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// HEADER + CELL HELPERS
// ============================================================================

fn read_headers<R: Read>(
    reader: &mut csv::Reader<R>,
    export: &'static str,
) -> Result<Vec<String>> {
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read {} header row", export))?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(ExportError::NoHeader { export }.into());
    }

    Ok(headers)
}

/// Position of the first alias present in the header row
pub fn resolve_column(
    headers: &[String],
    export: &'static str,
    field: &'static str,
    aliases: &[String],
) -> Result<usize, ExportError> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h == alias.trim()))
        .ok_or_else(|| ExportError::MissingColumn {
            export,
            field,
            aliases: aliases.join(", "),
        })
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader)
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|cell| cell.trim().is_empty())
}

fn cell<'r>(
    record: &'r StringRecord,
    idx: usize,
    field: &'static str,
    line: u64,
) -> Result<&'r str, RowError> {
    record
        .get(idx)
        .map(str::trim)
        .ok_or(RowError::MissingField { line, field })
}

/// "$1,234.50" → 1234.50; blank → None
fn parse_price(value: &str, line: u64) -> Result<Option<Decimal>, RowError> {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(&cleaned)
        .map(Some)
        .map_err(|_| RowError::InvalidNumber {
            line,
            field: "full_rate",
            value: value.trim().to_string(),
        })
}

/// Runs `row_fn` over every non-blank data row, in file order
fn collect_rows<R, T, F>(rdr: &mut csv::Reader<R>, row_fn: F) -> Vec<Result<T, RowError>>
where
    R: Read,
    F: Fn(&StringRecord, u64) -> Result<T, RowError>,
{
    let mut rows = Vec::new();

    for result in rdr.records() {
        match result {
            Ok(record) => {
                if is_blank(&record) {
                    continue;
                }
                rows.push(row_fn(&record, line_of(&record)));
            }
            Err(e) => rows.push(Err(unreadable(&e))),
        }
    }

    rows
}

fn unreadable(err: &csv::Error) -> RowError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    RowError::Unreadable {
        line,
        message: err.to_string(),
    }
}

// ============================================================================
// RATE EXPORT
// ============================================================================

pub struct RateExportParser {
    columns: RateColumns,
}

impl RateExportParser {
    pub fn new(columns: RateColumns) -> Self {
        RateExportParser { columns }
    }
}

impl ExportParser for RateExportParser {
    type Record = RateRecord;

    fn export_name(&self) -> &'static str {
        "rates"
    }

    fn parse_reader<R: Read>(&self, reader: R) -> Result<ParsedExport<RateRecord>> {
        let export = self.export_name();
        let mut rdr = csv_reader(reader);
        let headers = read_headers(&mut rdr, export)?;

        let c = &self.columns;
        let id_idx = resolve_column(&headers, export, "rate_id", &c.rate_id)?;
        let pub_idx = resolve_column(&headers, export, "publication", &c.publication)?;
        let desc_idx = resolve_column(&headers, export, "description", &c.description)?;
        let len_idx = resolve_column(&headers, export, "length", &c.length)?;
        let unit_idx = resolve_column(&headers, export, "length_unit", &c.length_unit)?;
        let rate_idx = resolve_column(&headers, export, "full_rate", &c.full_rate)?;

        let rows = collect_rows(&mut rdr, |record, line| {
            let mut rate = RateRecord::new(
                cell(record, id_idx, "rate_id", line)?,
                cell(record, pub_idx, "publication", line)?,
                cell(record, desc_idx, "description", line)?,
            );

            let length_raw = cell(record, len_idx, "length", line)?;
            let unit = cell(record, unit_idx, "length_unit", line)?;
            let price_raw = cell(record, rate_idx, "full_rate", line)?;

            // Unusable terms leave price/length empty; the row still feeds the catalog
            rate.length = length_raw.parse::<u32>().ok().filter(|l| *l > 0);
            rate.length_text = length_raw.to_string();
            rate.unit_code = unit.to_string();
            rate.price = match parse_price(price_raw, line) {
                Ok(price) => price,
                Err(err) => {
                    log::debug!("Rate {}: {}", rate.rate_id, err);
                    None
                }
            };

            Ok(rate)
        });

        Ok(ParsedExport { rows, file_hash: None })
    }
}

// ============================================================================
// SUBSCRIPTION EXPORT
// ============================================================================

pub struct SubscriptionExportParser {
    columns: SubscriptionColumns,
}

impl SubscriptionExportParser {
    pub fn new(columns: SubscriptionColumns) -> Self {
        SubscriptionExportParser { columns }
    }
}

impl ExportParser for SubscriptionExportParser {
    type Record = Subscription;

    fn export_name(&self) -> &'static str {
        "subscriptions"
    }

    fn parse_reader<R: Read>(&self, reader: R) -> Result<ParsedExport<Subscription>> {
        let export = self.export_name();
        let mut rdr = csv_reader(reader);
        let headers = read_headers(&mut rdr, export)?;

        let c = &self.columns;
        let id_idx = resolve_column(&headers, export, "id", &c.id)?;
        let status_idx = resolve_column(&headers, export, "status", &c.status)?;
        let rate_idx = resolve_column(&headers, export, "rate_id", &c.rate_id)?;
        let route_idx = resolve_column(&headers, export, "route", &c.route)?;
        let vac_idx =
            resolve_column(&headers, export, "vacation_indicator", &c.vacation_indicator)?;

        let rows = collect_rows(&mut rdr, |record, line| {
            let rate_id = cell(record, rate_idx, "rate_id", line)?;
            if rate_id.is_empty() {
                return Err(RowError::MissingField { line, field: "rate_id" });
            }

            // Blank indicator means no hold
            let vac_raw = cell(record, vac_idx, "vacation_indicator", line)?;
            let vacation_indicator = if vac_raw.is_empty() {
                0
            } else {
                vac_raw.parse::<u64>().map_err(|_| RowError::InvalidNumber {
                    line,
                    field: "vacation_indicator",
                    value: vac_raw.to_string(),
                })?
            };

            Ok(Subscription {
                id: cell(record, id_idx, "id", line)?.to_string(),
                status: cell(record, status_idx, "status", line)?.to_string(),
                rate_id: rate_id.to_string(),
                route: cell(record, route_idx, "route", line)?.to_string(),
                vacation_indicator,
            })
        });

        Ok(ParsedExport { rows, file_hash: None })
    }
}

// ============================================================================
// VACATION EXPORT
// ============================================================================

pub struct VacationExportParser {
    columns: VacationColumns,
}

impl VacationExportParser {
    pub fn new(columns: VacationColumns) -> Self {
        VacationExportParser { columns }
    }
}

impl ExportParser for VacationExportParser {
    type Record = VacationRecord;

    fn export_name(&self) -> &'static str {
        "vacations"
    }

    fn parse_reader<R: Read>(&self, reader: R) -> Result<ParsedExport<VacationRecord>> {
        let export = self.export_name();
        let mut rdr = csv_reader(reader);
        let headers = read_headers(&mut rdr, export)?;

        let c = &self.columns;
        let sub_idx = resolve_column(&headers, export, "subscriber", &c.subscriber)?;
        let beg_idx = resolve_column(&headers, export, "begin", &c.begin)?;
        let end_idx = resolve_column(&headers, export, "end", &c.end)?;

        let rows = collect_rows(&mut rdr, |record, line| {
            Ok(VacationRecord {
                subscriber: cell(record, sub_idx, "subscriber", line)?.to_string(),
                begin: cell(record, beg_idx, "begin", line)?.to_string(),
                // short row = no end date
                end: record.get(end_idx).unwrap_or("").trim().to_string(),
                line_number: line,
            })
        });

        Ok(ParsedExport { rows, file_hash: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnConfig;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rates_by_header_name_any_order() {
        let csv = "rr_desc,full_rate,rr_code,rr_len_type,rr_edition,rr_length\n\
                   TJ 1 Year,$156.00,100,Y,TJ,1\n\
                   TJ Monthly,\"1,012.5\",101,M,TJ,1\n";

        let parsed = RateExportParser::new(ColumnConfig::default().rates)
            .parse_reader(csv.as_bytes())
            .unwrap();
        let records = parsed.into_records();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].rate_id, "100");
        assert_eq!(records[0].publication, "TJ");
        assert_eq!(records[0].price, Some(dec!(156.00)));
        assert_eq!(records[0].length, Some(1));
        assert_eq!(records[0].unit_code, "Y");
        assert_eq!(records[1].price, Some(dec!(1012.5)));
    }

    #[test]
    fn test_rates_second_variant_headers_with_padding() {
        // This variant pads headers with a leading space
        let csv = r#" Rate.rr Online Desc, Rate.rr Edition, Rate.rr Length," Rate.rr Len Type(m=month,Y-year,W=week)", Sub Rate Id, Full Rate
TA 52 Weeks,TA,52,W,7001,99.99
"#;

        let parsed = RateExportParser::new(ColumnConfig::default().rates)
            .parse_reader(csv.as_bytes())
            .unwrap();
        let records = parsed.into_records();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rate_id, "7001");
        assert_eq!(records[0].publication, "TA");
        assert_eq!(records[0].length, Some(52));
        assert_eq!(records[0].unit_code, "W");
    }

    #[test]
    fn test_rates_unusable_terms_kept_for_catalog() {
        let csv = "rr_code,rr_edition,rr_desc,rr_length,rr_len_type,full_rate\n\
                   100,TJ,Comp,,Y,\n\
                   101,TJ,Bad price,12,M,twelve\n";

        let records = RateExportParser::new(ColumnConfig::default().rates)
            .parse_reader(csv.as_bytes())
            .unwrap()
            .into_records();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].length, None);
        assert_eq!(records[0].price, None);
        assert_eq!(records[1].length, Some(12));
        assert_eq!(records[1].length_text, "12");
        assert_eq!(records[1].price, None);
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let csv = "rr_code,rr_edition,rr_desc,rr_length,rr_len_type\n100,TJ,x,1,Y\n";

        let err = RateExportParser::new(ColumnConfig::default().rates)
            .parse_reader(csv.as_bytes())
            .unwrap_err();
        let export_err = err.downcast_ref::<ExportError>().unwrap();
        assert!(matches!(
            export_err,
            ExportError::MissingColumn { field: "full_rate", .. }
        ));
    }

    #[test]
    fn test_subscription_rows() {
        let csv = "sp_num,sp_stat,sp_rate_id,sp_route,sp_vac_ind\n\
                   1,A,100,MAIL,0\n\
                   2,A,100,INTERNET,\n\
                   \n\
                   3,A,,CARRIER,0\n\
                   4,A,100,MOTOR,abc\n\
                   5,A,100\n\
                   6,I,200,MAIL,17\n";

        let parsed = SubscriptionExportParser::new(ColumnConfig::default().subscriptions)
            .parse_reader(csv.as_bytes())
            .unwrap();

        assert_eq!(parsed.len(), 6);
        assert_eq!(parsed.rejected_count(), 3);

        let records: Vec<&Subscription> = parsed.records().collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].vacation_indicator, 0);
        assert_eq!(records[2].vacation_indicator, 17);

        let reasons: Vec<&RowError> = parsed.rejected().collect();
        assert!(matches!(reasons[0], RowError::MissingField { field: "rate_id", .. }));
        assert!(matches!(reasons[1], RowError::InvalidNumber { field: "vacation_indicator", .. }));
        assert!(matches!(reasons[2], RowError::MissingField { field: "vacation_indicator", .. }));
    }

    #[test]
    fn test_vacation_rows() {
        let csv = "vd_sp_id,vd_beg_date,vd_end_date\n\
                   5,06/14/25,06/16/25\n\
                   6,06/01/25,\n\
                   7,06/01/25\n";

        let parsed = VacationExportParser::new(ColumnConfig::default().vacations)
            .parse_reader(csv.as_bytes())
            .unwrap();
        let records = parsed.into_records();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].subscriber, "5");
        assert_eq!(records[0].line_number, 2);
        assert_eq!(records[1].end, "");
        assert_eq!(records[2].end, "");
    }

    #[test]
    fn test_parse_file_records_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vacations.csv");
        let content = "vd_sp_id,vd_beg_date,vd_end_date\n5,06/14/25,06/16/25\n";
        std::fs::write(&path, content).unwrap();

        let parsed = VacationExportParser::new(ColumnConfig::default().vacations)
            .parse_file(&path)
            .unwrap();

        assert_eq!(parsed.file_hash, Some(hash_bytes(content.as_bytes())));
        assert_eq!(parsed.file_hash.as_ref().unwrap().len(), 64);
    }
}
