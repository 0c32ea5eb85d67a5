//! CSV parsing and locality detection
//!
//! Takes the raw bytes of a municipal violation export and produces a
//! stream of accepted rows (each stamped with a validated city and state)
//! plus a stream of rejections with reasons. Delimiter and column layout
//! are detected, not declared; every city's export names its columns
//! differently.

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use thiserror::Error;

use super::locality;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("no address column detected in header: {0}")]
    MissingAddressColumn(String),
    #[error("CSV read error: {0}")]
    Csv(#[from] csv::Error),
}

/// Why a data row was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyRow,
    MissingAddress,
    MissingLocation,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::EmptyRow => "empty row",
            RejectReason::MissingAddress => "missing address",
            RejectReason::MissingLocation => "no usable city/state",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct RejectedRow {
    pub row_num: i32,
    pub reason: RejectReason,
}

/// One accepted data row, with validated locality stamped on.
///
/// `raw` keeps the original field values in header order so the city
/// splitter can re-serialize rows without loss.
#[derive(Debug, Clone)]
pub struct ParsedRow {
    pub row_num: i32,
    pub raw: Vec<String>,
    pub case_id: Option<String>,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: Option<String>,
    pub violation_type: Option<String>,
    pub status: Option<String>,
    pub opened_date: Option<String>,
    pub last_updated_date: Option<String>,
}

/// City/state the uploader declared for the whole file, used when a row
/// carries no usable locality of its own.
#[derive(Debug, Clone, Default)]
pub struct DeclaredLocality {
    pub city: Option<String>,
    pub state: Option<String>,
}

impl DeclaredLocality {
    pub fn new(city: Option<String>, state: Option<String>) -> Self {
        Self {
            city: city.filter(|c| locality::validate_city(c)),
            state: state.as_deref().and_then(locality::normalize_state),
        }
    }
}

/// Row count per distinct (city, state), display casing from first sight.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LocalityCount {
    pub city: String,
    pub state: String,
    pub rows: usize,
}

/// Summary of which localities a file contains.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LocalityDetection {
    pub total_rows: usize,
    pub localities: Vec<LocalityCount>,
    pub missing_location_rows: usize,
}

impl LocalityDetection {
    pub fn is_multi_city(&self) -> bool {
        self.localities.len() > 1
    }
}

/// Full result of parsing one source CSV.
#[derive(Debug)]
pub struct ParseOutcome {
    pub headers: Vec<String>,
    pub rows: Vec<ParsedRow>,
    pub rejected: Vec<RejectedRow>,
    pub detection: LocalityDetection,
}

impl ParseOutcome {
    /// Zero-row outcome for inputs with nothing to parse (empty file, blank
    /// header). Not an error; the caller decides whether it is fatal.
    fn empty() -> Self {
        Self {
            headers: Vec::new(),
            rows: Vec::new(),
            rejected: Vec::new(),
            detection: LocalityDetection {
                total_rows: 0,
                localities: Vec::new(),
                missing_location_rows: 0,
            },
        }
    }
}

/// Positions of the recognized columns within the header.
#[derive(Debug, Default)]
struct ColumnMap {
    address: Option<usize>,
    city: Option<usize>,
    state: Option<usize>,
    zip: Option<usize>,
    case_id: Option<usize>,
    violation: Option<usize>,
    status: Option<usize>,
    opened: Option<usize>,
    updated: Option<usize>,
}

const ADDRESS_ALIASES: &[&str] = &[
    "address",
    "property_address",
    "site_address",
    "location_address",
    "street_address",
    "location",
];
const CITY_ALIASES: &[&str] = &["city", "municipality", "property_city"];
const STATE_ALIASES: &[&str] = &["state", "st", "property_state"];
const ZIP_ALIASES: &[&str] = &["zip", "zipcode", "zip_code", "postal_code"];
const CASE_ALIASES: &[&str] = &[
    "case_id",
    "case_number",
    "case_no",
    "case",
    "casenumber",
    "record_id",
];
const VIOLATION_ALIASES: &[&str] = &[
    "violation",
    "violation_type",
    "violation_description",
    "violation_code",
    "code_violation",
    "description",
    "complaint",
];
const STATUS_ALIASES: &[&str] = &["status", "case_status", "violation_status"];
const OPENED_ALIASES: &[&str] = &[
    "opened_date",
    "open_date",
    "date_opened",
    "opened",
    "violation_date",
    "case_date",
    "date",
];
const UPDATED_ALIASES: &[&str] = &[
    "last_updated_date",
    "last_updated",
    "last_update",
    "updated_date",
    "date_updated",
    "closed_date",
];

impl ColumnMap {
    /// Resolve known columns against normalized header names. First alias
    /// hit wins; later duplicate columns are ignored.
    fn resolve(headers: &[String]) -> Self {
        let mut map = Self::default();
        let find = |aliases: &[&str]| -> Option<usize> {
            for alias in aliases {
                if let Some(pos) = headers.iter().position(|h| h == alias) {
                    return Some(pos);
                }
            }
            None
        };
        map.address = find(ADDRESS_ALIASES);
        map.city = find(CITY_ALIASES);
        map.state = find(STATE_ALIASES);
        map.zip = find(ZIP_ALIASES);
        map.case_id = find(CASE_ALIASES);
        map.violation = find(VIOLATION_ALIASES);
        map.status = find(STATUS_ALIASES);
        map.opened = find(OPENED_ALIASES);
        map.updated = find(UPDATED_ALIASES);
        map
    }
}

/// Normalize a header cell: trim, lowercase, spaces and punctuation to
/// underscores, runs collapsed.
fn normalize_header(cell: &str) -> String {
    let mut out = String::with_capacity(cell.len());
    let mut in_run = false;
    for c in cell.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            in_run = false;
        } else if !in_run && !out.is_empty() {
            out.push('_');
            in_run = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Pick the field delimiter by counting candidates in the header line.
/// Ties go to comma.
fn detect_delimiter(sample: &str) -> u8 {
    let line = sample.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let commas = line.matches(',').count();
    let tabs = line.matches('\t').count();
    let pipes = line.matches('|').count();
    if tabs > commas && tabs > pipes {
        b'\t'
    } else if pipes > commas && pipes >= tabs {
        b'|'
    } else {
        b','
    }
}

fn field(record: &StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Parse one source CSV into accepted and rejected rows.
///
/// Rows never abort the parse; a bad line becomes a [`RejectedRow`] and the
/// caller decides how to report it. Empty input and a blank header are
/// zero-row outcomes, not errors; a missing address column is the one
/// structural problem that is.
pub fn parse_csv(text: &str, declared: &DeclaredLocality) -> Result<ParseOutcome, ParseError> {
    if text.trim().is_empty() {
        return Ok(ParseOutcome::empty());
    }

    let delimiter = detect_delimiter(text);
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let header_record = reader.headers()?.clone();
    if header_record.iter().all(|h| h.trim().is_empty()) {
        return Ok(ParseOutcome::empty());
    }
    let headers: Vec<String> = header_record.iter().map(|h| h.trim().to_string()).collect();
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();

    let columns = ColumnMap::resolve(&normalized);
    if columns.address.is_none() {
        return Err(ParseError::MissingAddressColumn(headers.join(", ")));
    }

    let mut rows = Vec::new();
    let mut rejected = Vec::new();
    let mut locality_order: Vec<String> = Vec::new();
    let mut locality_counts: HashMap<String, LocalityCount> = HashMap::new();
    let mut missing_location = 0usize;
    let mut row_num = 0i32;

    for record in reader.records() {
        let record = record?;
        row_num += 1;

        if record.iter().all(|f| f.trim().is_empty()) {
            rejected.push(RejectedRow {
                row_num,
                reason: RejectReason::EmptyRow,
            });
            continue;
        }

        let Some(address) = field(&record, columns.address) else {
            rejected.push(RejectedRow {
                row_num,
                reason: RejectReason::MissingAddress,
            });
            continue;
        };

        let raw_city = field(&record, columns.city).unwrap_or_default();
        let mut zip = field(&record, columns.zip).filter(|z| locality::is_bare_zip(z));

        // A ZIP in the city column is common enough to deserve recovery.
        if zip.is_none() && locality::is_bare_zip(&raw_city) {
            zip = Some(raw_city.trim().to_string());
        }
        if zip.is_none() {
            zip = locality::extract_zip_from_address(&address);
        }

        let mut city = if locality::validate_city(&raw_city) {
            raw_city
        } else {
            String::new()
        };
        if city.is_empty() {
            city = locality::extract_city_from_address(&address).unwrap_or_default();
        }
        if city.is_empty() {
            city = declared.city.clone().unwrap_or_default();
        }

        let mut state = field(&record, columns.state)
            .as_deref()
            .and_then(locality::normalize_state)
            .unwrap_or_default();
        if state.is_empty() {
            state = locality::extract_state_from_address(&address).unwrap_or_default();
        }
        if state.is_empty() {
            state = declared.state.clone().unwrap_or_default();
        }

        if city.is_empty() || state.is_empty() {
            missing_location += 1;
            rejected.push(RejectedRow {
                row_num,
                reason: RejectReason::MissingLocation,
            });
            continue;
        }

        let key = format!("{}|{}", city.to_lowercase(), state.to_lowercase());
        match locality_counts.get_mut(&key) {
            Some(entry) => entry.rows += 1,
            None => {
                locality_order.push(key.clone());
                locality_counts.insert(
                    key,
                    LocalityCount {
                        city: city.clone(),
                        state: state.clone(),
                        rows: 1,
                    },
                );
            }
        }

        rows.push(ParsedRow {
            row_num,
            raw: record.iter().map(String::from).collect(),
            case_id: field(&record, columns.case_id),
            address,
            city,
            state,
            zip,
            violation_type: field(&record, columns.violation),
            status: field(&record, columns.status),
            opened_date: field(&record, columns.opened),
            last_updated_date: field(&record, columns.updated),
        });
    }

    let localities = locality_order
        .into_iter()
        .filter_map(|key| locality_counts.remove(&key))
        .collect();

    Ok(ParseOutcome {
        headers,
        rows,
        rejected,
        detection: LocalityDetection {
            total_rows: row_num as usize,
            localities,
            missing_location_rows: missing_location,
        },
    })
}

/// Pre-job structural validation, run before anything is persisted.
///
/// Returns human-readable problems; an empty vector means the file is
/// worth creating a job for.
pub fn validate_structure(text: &str) -> Vec<String> {
    let mut problems = Vec::new();

    if text.trim().is_empty() {
        problems.push("file is empty".to_string());
        return problems;
    }

    let delimiter = detect_delimiter(text);
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = match reader.headers() {
        Ok(h) => h.iter().map(normalize_header).collect(),
        Err(e) => {
            problems.push(format!("unreadable header row: {}", e));
            return problems;
        }
    };
    if headers.iter().all(|h| h.is_empty()) {
        problems.push("no header row found".to_string());
        return problems;
    }

    let columns = ColumnMap::resolve(&headers);
    if columns.address.is_none() {
        problems.push("no address column detected".to_string());
    }
    if columns.violation.is_none() {
        problems.push("no violation description column detected".to_string());
    }

    let data_rows = reader.records().filter_map(|r| r.ok()).count();
    if data_rows == 0 {
        problems.push("no data rows after the header".to_string());
    }

    problems
}

/// Parse a date in any of the formats municipal exports actually use.
pub fn parse_flexible_date(value: &str) -> Option<NaiveDate> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    const FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%Y/%m/%d", "%m/%d/%y"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(v, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_fallback() -> DeclaredLocality {
        DeclaredLocality::default()
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), b',');
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3"), b'\t');
        assert_eq!(detect_delimiter("a|b|c\n1|2|3"), b'|');
        // Ties go to comma.
        assert_eq!(detect_delimiter("a,b|c,d|e"), b',');
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  Case Number "), "case_number");
        assert_eq!(normalize_header("Violation-Type"), "violation_type");
        assert_eq!(normalize_header("ZIP"), "zip");
        assert_eq!(normalize_header("Opened  Date"), "opened_date");
    }

    #[test]
    fn test_parse_basic_file() {
        let csv = "Case Number,Address,City,State,Zip,Violation,Status,Opened Date\n\
                   C-1,123 Main St,Phoenix,AZ,85001,Overgrown weeds,Open,2024-06-01\n\
                   C-2,456 Oak Ave,Phoenix,AZ,85002,Junk vehicle,Closed,05/15/2024\n";
        let outcome = parse_csv(csv, &no_fallback()).unwrap();
        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.rejected.len(), 0);
        assert_eq!(outcome.detection.total_rows, 2);
        assert_eq!(outcome.detection.localities.len(), 1);
        assert_eq!(outcome.detection.localities[0].city, "Phoenix");

        let row = &outcome.rows[0];
        assert_eq!(row.case_id.as_deref(), Some("C-1"));
        assert_eq!(row.address, "123 Main St");
        assert_eq!(row.state, "AZ");
        assert_eq!(row.zip.as_deref(), Some("85001"));
        assert_eq!(row.violation_type.as_deref(), Some("Overgrown weeds"));
    }

    #[test]
    fn test_parse_tab_delimited() {
        let csv = "address\tcity\tstate\tviolation\n12 Elm St\tMesa\tAZ\tDebris\n";
        let outcome = parse_csv(csv, &no_fallback()).unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].city, "Mesa");
    }

    #[test]
    fn test_missing_address_column_is_fatal() {
        let csv = "city,state,violation\nPhoenix,AZ,Weeds\n";
        assert!(matches!(
            parse_csv(csv, &no_fallback()),
            Err(ParseError::MissingAddressColumn(_))
        ));
    }

    #[test]
    fn test_empty_input_is_zero_row_result() {
        for input in ["", "   \n  "] {
            let outcome = parse_csv(input, &no_fallback()).unwrap();
            assert!(outcome.rows.is_empty());
            assert!(outcome.rejected.is_empty());
            assert_eq!(outcome.detection.total_rows, 0);
        }
    }

    #[test]
    fn test_blank_header_is_zero_row_result() {
        let outcome = parse_csv(" , , \n1 A St,Phoenix,AZ\n", &no_fallback()).unwrap();
        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.detection.total_rows, 0);
    }

    #[test]
    fn test_header_only_input_is_zero_row_result() {
        let outcome = parse_csv("address,city,state\n", &no_fallback()).unwrap();
        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.headers, vec!["address", "city", "state"]);
        assert_eq!(outcome.detection.total_rows, 0);
    }

    #[test]
    fn test_row_missing_address_rejected() {
        let csv = "address,city,state\n,Phoenix,AZ\n123 Main St,Phoenix,AZ\n";
        let outcome = parse_csv(csv, &no_fallback()).unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].reason, RejectReason::MissingAddress);
        assert_eq!(outcome.rejected[0].row_num, 1);
    }

    #[test]
    fn test_violation_narrative_in_city_column() {
        // City column holds leaked narrative; no recovery possible and no
        // declared fallback, so the row counts as missing-location.
        let csv = "address,city,state,violation\n\
                   123 Main St,\"Overgrown weeds in backyard, must repair fence\",AZ,Weeds\n";
        let outcome = parse_csv(csv, &no_fallback()).unwrap();
        assert_eq!(outcome.rows.len(), 0);
        assert_eq!(outcome.detection.missing_location_rows, 1);
        assert_eq!(outcome.rejected[0].reason, RejectReason::MissingLocation);
    }

    #[test]
    fn test_zip_in_city_column_recovers_from_address() {
        let csv = "address,city,state\n123 Main St Phoenix AZ,85001,AZ\n";
        let outcome = parse_csv(csv, &no_fallback()).unwrap();
        assert_eq!(outcome.rows.len(), 1);
        let row = &outcome.rows[0];
        assert_eq!(row.city, "Phoenix");
        assert_eq!(row.zip.as_deref(), Some("85001"));
    }

    #[test]
    fn test_declared_fallback_fills_gaps() {
        let declared = DeclaredLocality::new(Some("Mesa".to_string()), Some("az".to_string()));
        let csv = "address,violation\n55 Hill Rd,Weeds\n";
        let outcome = parse_csv(csv, &declared).unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].city, "Mesa");
        assert_eq!(outcome.rows[0].state, "AZ");
    }

    #[test]
    fn test_multi_city_detection_order_and_counts() {
        let csv = "address,city,state\n\
                   1 A St,Phoenix,AZ\n\
                   2 B St,Mesa,AZ\n\
                   3 C St,phoenix,az\n";
        let outcome = parse_csv(csv, &no_fallback()).unwrap();
        assert!(outcome.detection.is_multi_city());
        assert_eq!(outcome.detection.localities.len(), 2);
        // Case-insensitive grouping, first-seen casing kept.
        assert_eq!(outcome.detection.localities[0].city, "Phoenix");
        assert_eq!(outcome.detection.localities[0].rows, 2);
        assert_eq!(outcome.detection.localities[1].city, "Mesa");
        assert_eq!(outcome.detection.localities[1].rows, 1);
    }

    #[test]
    fn test_validate_structure() {
        assert_eq!(
            validate_structure("address,city,violation\n1 A St,Phoenix,Weeds\n"),
            Vec::<String>::new()
        );
        assert!(validate_structure("").contains(&"file is empty".to_string()));
        assert!(validate_structure("city,state\nPhoenix,AZ\n")
            .contains(&"no address column detected".to_string()));
        assert!(validate_structure("address,violation\n")
            .contains(&"no data rows after the header".to_string()));
    }

    #[test]
    fn test_parse_flexible_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 6, 1);
        assert_eq!(parse_flexible_date("2024-06-01"), expected);
        assert_eq!(parse_flexible_date("06/01/2024"), expected);
        assert_eq!(parse_flexible_date("06-01-2024"), expected);
        assert_eq!(parse_flexible_date(" 2024/06/01 "), expected);
        assert_eq!(parse_flexible_date("not a date"), None);
        assert_eq!(parse_flexible_date(""), None);
    }
}
