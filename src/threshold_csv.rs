//! Threshold release CSV parsing and structural validation. Any error in the
//! returned list means the caller rejects the whole import; rows are never
//! partially applied.

use std::collections::HashSet;
use std::str::FromStr;

use csv::{ReaderBuilder, StringRecord, Trim};
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::model::Severity;
use crate::params::normalize_parameter_code;
use crate::units::normalize_unit;

const REQUIRED_COLUMNS: [&str; 3] = ["product_category", "parameter_name", "unit"];
const OPTIONAL_COLUMNS: [&str; 6] = [
    "parameter_code",
    "limit_min",
    "limit_max",
    "severity",
    "source_clause",
    "remarks",
];

/// One structurally valid, unit-normalized row from an uploaded release.
/// `unit_raw` keeps the original spelling for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdCsvRow {
    pub product_category: String,
    pub parameter_code: String,
    pub parameter_name: String,
    pub limit_min: Option<Decimal>,
    pub limit_max: Option<Decimal>,
    pub unit: String,
    pub unit_raw: String,
    pub severity: Severity,
    pub source_clause: String,
    pub remarks: Option<String>,
}

#[derive(Debug, Default)]
struct ColumnMap {
    product_category: Option<usize>,
    parameter_name: Option<usize>,
    unit: Option<usize>,
    parameter_code: Option<usize>,
    limit_min: Option<usize>,
    limit_max: Option<usize>,
    severity: Option<usize>,
    source_clause: Option<usize>,
    remarks: Option<usize>,
}

/// Parses UTF-8 (BOM-tolerant) CSV text. Header problems are a hard
/// `Validation` error; row problems accumulate as human-readable messages
/// referencing the literal row number (header is row 1, data starts at 2).
/// Duplicate (product_category, parameter_code) keys keep the first
/// occurrence and report the rest.
pub fn parse_threshold_csv(content: &[u8]) -> Result<(Vec<ThresholdCsvRow>, Vec<String>)> {
    let decoded = String::from_utf8_lossy(content);
    let text = decoded.strip_prefix('\u{feff}').unwrap_or(&decoded);

    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|err| Error::validation(format!("CSV header could not be read: {err}")))?
        .clone();
    let columns = map_columns(&headers)?;

    let mut rows: Vec<ThresholdCsvRow> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for (index, record) in reader.records().enumerate() {
        let row_num = index + 2;
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                errors.push(format!("Row {row_num}: unreadable CSV record ({err})"));
                continue;
            }
        };
        if let Some(row) = validate_row(&record, &columns, row_num, &mut errors) {
            rows.push(row);
        }
    }

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut deduped = Vec::with_capacity(rows.len());
    for row in rows {
        let key = (row.product_category.clone(), row.parameter_code.clone());
        if seen.contains(&key) {
            errors.push(format!(
                "Duplicate threshold key in CSV: product_category={}, parameter_code={}",
                row.product_category, row.parameter_code
            ));
            continue;
        }
        seen.insert(key);
        deduped.push(row);
    }

    Ok((deduped, errors))
}

fn map_columns(headers: &StringRecord) -> Result<ColumnMap> {
    let names: Vec<String> = headers
        .iter()
        .map(|header| header.trim().to_lowercase())
        .filter(|header| !header.is_empty())
        .collect();
    if names.is_empty() {
        return Err(Error::validation("CSV has no header row"));
    }

    let mut missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !names.iter().any(|name| name == *required))
        .copied()
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(Error::validation(format!(
            "CSV missing required columns: {}",
            missing.join(", ")
        )));
    }

    let mut unknown: Vec<&str> = names
        .iter()
        .filter(|name| {
            !REQUIRED_COLUMNS.contains(&name.as_str()) && !OPTIONAL_COLUMNS.contains(&name.as_str())
        })
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        unknown.sort_unstable();
        return Err(Error::validation(format!(
            "CSV has unsupported columns: {}",
            unknown.join(", ")
        )));
    }

    let mut columns = ColumnMap::default();
    for (index, header) in headers.iter().enumerate() {
        match header.trim().to_lowercase().as_str() {
            "product_category" => columns.product_category = Some(index),
            "parameter_name" => columns.parameter_name = Some(index),
            "unit" => columns.unit = Some(index),
            "parameter_code" => columns.parameter_code = Some(index),
            "limit_min" => columns.limit_min = Some(index),
            "limit_max" => columns.limit_max = Some(index),
            "severity" => columns.severity = Some(index),
            "source_clause" => columns.source_clause = Some(index),
            "remarks" => columns.remarks = Some(index),
            _ => {}
        }
    }
    Ok(columns)
}

fn field<'a>(record: &'a StringRecord, index: Option<usize>) -> &'a str {
    index
        .and_then(|index| record.get(index))
        .unwrap_or_default()
        .trim()
}

fn parse_decimal(raw: &str) -> std::result::Result<Option<Decimal>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map(Some)
        .map_err(|_| format!("Invalid numeric value '{raw}'"))
}

fn validate_row(
    record: &StringRecord,
    columns: &ColumnMap,
    row_num: usize,
    errors: &mut Vec<String>,
) -> Option<ThresholdCsvRow> {
    let product_category = field(record, columns.product_category);
    let parameter_name = field(record, columns.parameter_name);
    let unit_raw = field(record, columns.unit);
    let unit = normalize_unit(unit_raw);

    let mut required_missing = false;
    if product_category.is_empty() {
        errors.push(format!("Row {row_num}: product_category is required"));
        required_missing = true;
    }
    if parameter_name.is_empty() {
        errors.push(format!("Row {row_num}: parameter_name is required"));
        required_missing = true;
    }
    if unit.is_empty() {
        errors.push(format!("Row {row_num}: unit is required"));
        required_missing = true;
    }
    if required_missing {
        return None;
    }

    let limit_min = match parse_decimal(field(record, columns.limit_min)) {
        Ok(value) => value,
        Err(message) => {
            errors.push(format!("Row {row_num}: {message}"));
            return None;
        }
    };
    let limit_max = match parse_decimal(field(record, columns.limit_max)) {
        Ok(value) => value,
        Err(message) => {
            errors.push(format!("Row {row_num}: {message}"));
            return None;
        }
    };
    if limit_min.is_none() && limit_max.is_none() {
        errors.push(format!(
            "Row {row_num}: at least one of limit_min/limit_max is required"
        ));
        return None;
    }

    let severity_raw = field(record, columns.severity).to_lowercase();
    let severity = if severity_raw.is_empty() {
        Severity::Critical
    } else {
        match Severity::parse(&severity_raw) {
            Some(severity) => severity,
            None => {
                errors.push(format!(
                    "Row {row_num}: severity must be one of critical, high, low, medium"
                ));
                return None;
            }
        }
    };

    let source_clause = field(record, columns.source_clause);
    if source_clause.is_empty() {
        errors.push(format!(
            "Row {row_num}: source_clause is required for authoritative traceability"
        ));
        return None;
    }

    let code_field = field(record, columns.parameter_code);
    let parameter_code = if code_field.is_empty() {
        normalize_parameter_code(parameter_name)
    } else {
        normalize_parameter_code(code_field)
    };

    let remarks = field(record, columns.remarks);
    Some(ThresholdCsvRow {
        product_category: product_category.to_string(),
        parameter_code,
        parameter_name: parameter_name.to_string(),
        limit_min,
        limit_max,
        unit,
        unit_raw: unit_raw.to_string(),
        severity,
        source_clause: source_clause.to_string(),
        remarks: (!remarks.is_empty()).then(|| remarks.to_string()),
    })
}
