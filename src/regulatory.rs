//! Threshold release lifecycle: import -> coverage-gated approve ->
//! coverage-gated publish. Publish performs the effective-dated cutover of
//! the live threshold table and is the only place live thresholds change.
//! Every transition appends one audit event inside the same transaction as
//! its writes.

use std::str::FromStr;

use chrono::{Days, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::audit::append_audit_event;
use crate::clock::Clock;
use crate::coverage::release_coverage_report;
use crate::error::{Error, Result};
use crate::model::{
    ApproveOutcome, ComplianceThreshold, PublishOutcome, ReleaseDetail, ReleaseSummary,
    ReviewStatus, Severity, StandardName, ThresholdRelease, ThresholdValueRow,
};
use crate::requirements::active_parameter_requirements;
use crate::threshold_csv::{parse_threshold_csv, ThresholdCsvRow};
use crate::units::normalize_unit;

const ERROR_PREVIEW_LIMIT: usize = 8;
const DIFF_PREVIEW_LIMIT: usize = 6;

#[derive(Debug, Clone)]
pub struct ImportReleaseArgs {
    pub standard_name: String,
    pub release_code: String,
    pub document_title: String,
    pub effective_from: String,
    pub imported_by: String,
    pub jurisdiction: Option<String>,
    pub source_authority: String,
    pub document_url: Option<String>,
    pub publication_date: String,
    pub effective_to: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ReleaseRow {
    pub release_id: String,
    pub standard_name: StandardName,
    pub release_code: String,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub review_status: ReviewStatus,
}

pub(crate) fn require_release(conn: &Connection, release_id: &str) -> Result<ReleaseRow> {
    let row = conn
        .query_row(
            "
            SELECT release_id, standard_name, release_code, effective_from,
                   effective_to, review_status
            FROM regulatory_threshold_releases
            WHERE release_id = ?1
            ",
            [release_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, NaiveDate>(3)?,
                    row.get::<_, Option<NaiveDate>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((release_id, standard, release_code, effective_from, effective_to, status)) = row
    else {
        return Err(Error::not_found("Release not found"));
    };
    Ok(ReleaseRow {
        release_id,
        standard_name: StandardName::parse(&standard)?,
        release_code,
        effective_from,
        effective_to,
        review_status: ReviewStatus::parse(&status)?,
    })
}

fn parse_iso_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        Error::validation(format!("Invalid date format '{value}'. Use YYYY-MM-DD."))
    })
}

fn parse_optional_date(value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => parse_iso_date(raw).map(Some),
    }
}

fn clean_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
}

/// Checks parsed CSV rows against the mandatory requirement profile for the
/// release's standard. Imports against a standard with no governing profile
/// are refused outright.
fn validate_rows_against_requirements(
    conn: &Connection,
    standard: StandardName,
    effective_from: NaiveDate,
    rows: &[ThresholdCsvRow],
) -> Result<()> {
    let requirements = active_parameter_requirements(conn, effective_from, None)?;
    let required: Vec<_> = requirements
        .iter()
        .filter(|requirement| requirement.requires_standard(standard))
        .collect();
    if required.is_empty() {
        return Err(Error::validation(format!(
            "No active mandatory requirement rows configured for standard={} at effective_from={}. \
             Configure parameter requirements first.",
            standard.as_str(),
            effective_from
        )));
    }

    let mut missing: Vec<String> = Vec::new();
    let mut mismatches: Vec<String> = Vec::new();
    for requirement in &required {
        let row = rows.iter().find(|row| {
            row.product_category == requirement.product_category
                && row.parameter_code == requirement.parameter_code
        });
        let Some(row) = row else {
            missing.push(format!(
                "{}:{}",
                requirement.product_category, requirement.parameter_code
            ));
            continue;
        };
        if normalize_unit(&row.unit) != normalize_unit(&requirement.canonical_unit) {
            mismatches.push(format!(
                "{}:{} expected {} got {}",
                requirement.product_category,
                requirement.parameter_code,
                requirement.canonical_unit,
                row.unit
            ));
        }
    }

    if missing.is_empty() && mismatches.is_empty() {
        return Ok(());
    }

    let mut messages = Vec::new();
    if !missing.is_empty() {
        messages.push(format!(
            "missing required parameters: {}",
            preview(&missing, DIFF_PREVIEW_LIMIT)
        ));
    }
    if !mismatches.is_empty() {
        messages.push(format!(
            "unit mismatches: {}",
            preview(&mismatches, DIFF_PREVIEW_LIMIT)
        ));
    }
    Err(Error::validation(format!(
        "Coverage validation failed: {}",
        messages.join("; ")
    )))
}

fn preview(items: &[String], limit: usize) -> String {
    let head = items
        .iter()
        .take(limit)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if items.len() > limit {
        format!("{head} (+{} more)", items.len() - limit)
    } else {
        head
    }
}

/// Imports one release: validates metadata, parses and validates the CSV,
/// requires the governing profile to be satisfied, then persists the release
/// and all value rows atomically as a draft. Any error leaves no writes.
pub fn import_threshold_release(
    conn: &mut Connection,
    clock: &dyn Clock,
    args: &ImportReleaseArgs,
    csv_bytes: &[u8],
) -> Result<ReleaseSummary> {
    let standard = StandardName::parse(&args.standard_name)?;

    let release_code = args.release_code.trim();
    if release_code.is_empty() {
        return Err(Error::validation("release_code is required"));
    }
    let document_title = args.document_title.trim();
    if document_title.is_empty() {
        return Err(Error::validation("document_title is required"));
    }
    if args.effective_from.trim().is_empty() {
        return Err(Error::validation("effective_from is required"));
    }
    let effective_from = parse_iso_date(&args.effective_from)?;
    let effective_to = parse_optional_date(args.effective_to.as_deref())?;
    if let Some(effective_to) = effective_to {
        if effective_to < effective_from {
            return Err(Error::validation(
                "effective_to cannot be earlier than effective_from",
            ));
        }
    }
    let source_authority = args.source_authority.trim();
    if source_authority.is_empty() {
        return Err(Error::validation(
            "source_authority is required for authoritative regulatory imports",
        ));
    }
    if args.publication_date.trim().is_empty() {
        return Err(Error::validation(
            "publication_date is required for authoritative regulatory imports",
        ));
    }
    let publication_date = parse_iso_date(&args.publication_date)?;

    let (rows, errors) = parse_threshold_csv(csv_bytes)?;
    if !errors.is_empty() {
        return Err(Error::validation(format!(
            "CSV validation failed: {}",
            preview(&errors, ERROR_PREVIEW_LIMIT)
        )));
    }
    if rows.is_empty() {
        return Err(Error::validation("CSV has no valid threshold rows"));
    }

    validate_rows_against_requirements(conn, standard, effective_from, &rows)?;

    let release_id = Uuid::new_v4().to_string();
    let imported_at = clock.now();

    let tx = conn.transaction()?;
    let inserted = tx.execute(
        "
        INSERT INTO regulatory_threshold_releases (
          release_id, standard_name, release_code, jurisdiction, source_authority,
          document_title, document_url, publication_date, effective_from, effective_to,
          review_status, imported_by, imported_at, notes, row_count
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'draft', ?11, ?12, ?13, ?14)
        ",
        rusqlite::params![
            release_id,
            standard.as_str(),
            release_code,
            clean_optional(args.jurisdiction.as_deref()),
            source_authority,
            document_title,
            clean_optional(args.document_url.as_deref()),
            publication_date,
            effective_from,
            effective_to,
            args.imported_by,
            imported_at,
            clean_optional(args.notes.as_deref()),
            rows.len() as i64,
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(Error::conflict(format!(
                "release_code '{release_code}' already exists"
            )));
        }
        Err(err) => return Err(err.into()),
    }

    for row in &rows {
        tx.execute(
            "
            INSERT INTO regulatory_threshold_values (
              value_id, release_id, product_category, parameter_code, parameter_name,
              limit_min, limit_max, unit, severity, source_clause, remarks
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                release_id,
                row.product_category,
                row.parameter_code,
                row.parameter_name,
                row.limit_min.map(|value| value.to_string()),
                row.limit_max.map(|value| value.to_string()),
                row.unit,
                row.severity.as_str(),
                row.source_clause,
                row.remarks,
            ],
        )?;
    }

    append_audit_event(
        &tx,
        clock,
        &args.imported_by,
        "REG_THRESHOLD_RELEASE_IMPORTED",
        "regulatory_release",
        &release_id,
        serde_json::json!({
            "standard_name": standard.as_str(),
            "release_code": release_code,
            "effective_from": effective_from.to_string(),
            "effective_to": effective_to.map(|date| date.to_string()),
            "row_count": rows.len(),
            "document_title": document_title,
            "source_authority": source_authority,
            "publication_date": publication_date.to_string(),
        }),
    )?;
    tx.commit()?;

    let normalized_unit_rows = rows.iter().filter(|row| row.unit_raw != row.unit).count();
    info!(
        release_id = %release_id,
        release_code = %release_code,
        standard = standard.as_str(),
        rows = rows.len(),
        "imported threshold release"
    );

    Ok(ReleaseSummary {
        release_id,
        standard_name: standard,
        release_code: release_code.to_string(),
        review_status: ReviewStatus::Draft,
        row_count: rows.len(),
        effective_from,
        effective_to,
        normalized_unit_rows,
    })
}

fn coverage_gate_message(report: &crate::model::ReleaseCoverageReport, verb: &str) -> String {
    if !report.diagnostics.is_empty() {
        return format!(
            "Release cannot be {verb} until coverage is complete: {}",
            report.diagnostics.join("; ")
        );
    }
    format!(
        "Release cannot be {verb} until coverage is complete and units/source clauses are valid. \
         missing_required={}, unit_mismatches={}, missing_source_clause={}",
        report.missing_required.len(),
        report.unit_mismatches.len(),
        report.missing_source_clause.len()
    )
}

/// Approves a draft release after re-checking coverage. Approving an
/// already-approved release is idempotent and appends no audit event.
pub fn approve_threshold_release(
    conn: &mut Connection,
    clock: &dyn Clock,
    release_id: &str,
    approved_by: &str,
    notes: Option<&str>,
) -> Result<ApproveOutcome> {
    let release = require_release(conn, release_id)?;
    match release.review_status {
        ReviewStatus::Published => {
            return Err(Error::validation(
                "Release is already published and cannot be re-approved",
            ));
        }
        ReviewStatus::Approved => {
            return Ok(ApproveOutcome {
                release_id: release.release_id,
                review_status: ReviewStatus::Approved,
                idempotent: true,
            });
        }
        ReviewStatus::Rejected => {
            return Err(Error::validation("Release is rejected and cannot be approved"));
        }
        ReviewStatus::Draft => {}
    }

    let coverage = release_coverage_report(conn, release_id)?;
    if !coverage.ready_for_approval {
        return Err(Error::validation(coverage_gate_message(&coverage, "approved")));
    }

    let tx = conn.transaction()?;
    tx.execute(
        "
        UPDATE regulatory_threshold_releases
        SET review_status = 'approved',
            approved_by = ?2,
            approved_at = ?3,
            notes = COALESCE(?4, notes)
        WHERE release_id = ?1
        ",
        rusqlite::params![
            release_id,
            approved_by,
            clock.now(),
            clean_optional(notes)
        ],
    )?;
    append_audit_event(
        &tx,
        clock,
        approved_by,
        "REG_THRESHOLD_RELEASE_APPROVED",
        "regulatory_release",
        release_id,
        serde_json::json!({
            "release_id": release_id,
            "release_code": release.release_code,
        }),
    )?;
    tx.commit()?;

    info!(release_id = %release_id, "approved threshold release");
    Ok(ApproveOutcome {
        release_id: release_id.to_string(),
        review_status: ReviewStatus::Approved,
        idempotent: false,
    })
}

struct PublishValueRow {
    product_category: String,
    parameter_code: String,
    limit_min: Option<String>,
    limit_max: Option<String>,
    unit: String,
    severity: String,
    source_clause: String,
}

/// Publishes an approved release: closes previously open live rows for every
/// key the release redefines, inserts the release's rows as the new live
/// thresholds, and freezes the release. Close-then-insert runs inside one
/// transaction so readers never observe zero or two open rows for a key.
pub fn publish_threshold_release(
    conn: &mut Connection,
    clock: &dyn Clock,
    release_id: &str,
    published_by: &str,
) -> Result<PublishOutcome> {
    let release = require_release(conn, release_id)?;
    if release.review_status != ReviewStatus::Approved {
        return Err(Error::validation("Release must be approved before publish"));
    }

    let coverage = release_coverage_report(conn, release_id)?;
    if !coverage.ready_for_publish {
        return Err(Error::validation(coverage_gate_message(&coverage, "published")));
    }

    let rows: Vec<PublishValueRow> = {
        let mut statement = conn.prepare(
            "
            SELECT product_category, parameter_code, limit_min, limit_max,
                   unit, severity, source_clause
            FROM regulatory_threshold_values
            WHERE release_id = ?1
            ORDER BY product_category, parameter_code
            ",
        )?;
        statement
            .query_map([release_id], |row| {
                Ok(PublishValueRow {
                    product_category: row.get(0)?,
                    parameter_code: row.get(1)?,
                    limit_min: row.get(2)?,
                    limit_max: row.get(3)?,
                    unit: row.get(4)?,
                    severity: row.get(5)?,
                    source_clause: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };
    if rows.is_empty() {
        return Err(Error::validation("Release has no threshold rows to publish"));
    }

    let close_date = release
        .effective_from
        .checked_sub_days(Days::new(1))
        .ok_or_else(|| Error::internal("effective_from has no preceding day"))?;

    let tx = conn.transaction()?;
    let closed = tx.execute(
        "
        UPDATE compliance_thresholds
        SET effective_to = ?1
        WHERE standard_name = ?2
          AND effective_to IS NULL
          AND effective_from <= ?3
          AND EXISTS (
            SELECT 1
            FROM regulatory_threshold_values r
            WHERE r.release_id = ?4
              AND r.product_category = compliance_thresholds.product_category
              AND r.parameter_code = compliance_thresholds.parameter_code
          )
        ",
        rusqlite::params![
            close_date,
            release.standard_name.as_str(),
            release.effective_from,
            release_id
        ],
    )?;

    let mut inserted = 0_usize;
    for row in &rows {
        let source_ref = if row.source_clause.trim().is_empty() {
            release.release_code.clone()
        } else {
            format!("{}:{}", release.release_code, row.source_clause)
        };
        tx.execute(
            "
            INSERT INTO compliance_thresholds (
              threshold_id, parameter_code, standard_name, product_category,
              limit_min, limit_max, unit, severity, effective_from, effective_to, source_ref
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                row.parameter_code,
                release.standard_name.as_str(),
                row.product_category,
                row.limit_min,
                row.limit_max,
                row.unit,
                row.severity,
                release.effective_from,
                release.effective_to,
                source_ref,
            ],
        )?;
        inserted += 1;
    }

    tx.execute(
        "
        UPDATE regulatory_threshold_releases
        SET review_status = 'published',
            published_by = ?2,
            published_at = ?3
        WHERE release_id = ?1
        ",
        rusqlite::params![release_id, published_by, clock.now()],
    )?;

    append_audit_event(
        &tx,
        clock,
        published_by,
        "REG_THRESHOLD_RELEASE_PUBLISHED",
        "regulatory_release",
        release_id,
        serde_json::json!({
            "release_id": release_id,
            "standard_name": release.standard_name.as_str(),
            "release_code": release.release_code,
            "closed_previous_rows": closed,
            "inserted_rows": inserted,
            "effective_from": release.effective_from.to_string(),
            "effective_to": release.effective_to.map(|date| date.to_string()),
        }),
    )?;
    tx.commit()?;

    info!(
        release_id = %release_id,
        closed_previous_rows = closed,
        inserted_rows = inserted,
        "published threshold release"
    );

    Ok(PublishOutcome {
        release_id: release_id.to_string(),
        review_status: ReviewStatus::Published,
        closed_previous_rows: closed,
        inserted_rows: inserted,
        effective_from: release.effective_from,
        effective_to: release.effective_to,
    })
}

/// Live threshold rows whose effective window contains `as_of`.
pub fn list_active_thresholds(
    conn: &Connection,
    as_of: NaiveDate,
    product_category: Option<&str>,
) -> Result<Vec<ComplianceThreshold>> {
    let mut sql = String::from(
        "
        SELECT threshold_id, parameter_code, standard_name, product_category,
               limit_min, limit_max, unit, severity, effective_from, effective_to, source_ref
        FROM compliance_thresholds
        WHERE effective_from <= ?1
          AND (effective_to IS NULL OR effective_to >= ?1)
        ",
    );
    if product_category.is_some() {
        sql.push_str(" AND product_category = ?2");
    }
    sql.push_str(" ORDER BY standard_name, product_category, parameter_code");

    let mut statement = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row<'_>| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, NaiveDate>(8)?,
            row.get::<_, Option<NaiveDate>>(9)?,
            row.get::<_, String>(10)?,
        ))
    };
    let raws = match product_category {
        Some(category) => statement
            .query_map(rusqlite::params![as_of, category], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
        None => statement
            .query_map(rusqlite::params![as_of], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };

    let mut thresholds = Vec::with_capacity(raws.len());
    for (
        threshold_id,
        parameter_code,
        standard_name,
        product_category,
        limit_min,
        limit_max,
        unit,
        severity,
        effective_from,
        effective_to,
        source_ref,
    ) in raws
    {
        thresholds.push(ComplianceThreshold {
            threshold_id,
            parameter_code,
            standard_name: StandardName::parse(&standard_name)?,
            product_category,
            limit_min: decimal_from_store(limit_min)?,
            limit_max: decimal_from_store(limit_max)?,
            unit,
            severity: Severity::parse(&severity)
                .ok_or_else(|| Error::internal(format!("invalid severity in store: {severity}")))?,
            effective_from,
            effective_to,
            source_ref,
        });
    }
    Ok(thresholds)
}

pub(crate) fn decimal_from_store(raw: Option<String>) -> Result<Option<Decimal>> {
    raw.map(|text| {
        Decimal::from_str(&text)
            .map_err(|_| Error::internal(format!("invalid decimal in store: {text}")))
    })
    .transpose()
}

fn release_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThresholdReleaseRaw> {
    Ok(ThresholdReleaseRaw {
        release_id: row.get(0)?,
        standard_name: row.get(1)?,
        release_code: row.get(2)?,
        jurisdiction: row.get(3)?,
        source_authority: row.get(4)?,
        document_title: row.get(5)?,
        document_url: row.get(6)?,
        publication_date: row.get(7)?,
        effective_from: row.get(8)?,
        effective_to: row.get(9)?,
        review_status: row.get(10)?,
        imported_by: row.get(11)?,
        imported_at: row.get(12)?,
        approved_by: row.get(13)?,
        approved_at: row.get(14)?,
        published_by: row.get(15)?,
        published_at: row.get(16)?,
        row_count: row.get(17)?,
        notes: row.get(18)?,
    })
}

struct ThresholdReleaseRaw {
    release_id: String,
    standard_name: String,
    release_code: String,
    jurisdiction: Option<String>,
    source_authority: String,
    document_title: String,
    document_url: Option<String>,
    publication_date: NaiveDate,
    effective_from: NaiveDate,
    effective_to: Option<NaiveDate>,
    review_status: String,
    imported_by: String,
    imported_at: chrono::DateTime<chrono::Utc>,
    approved_by: Option<String>,
    approved_at: Option<chrono::DateTime<chrono::Utc>>,
    published_by: Option<String>,
    published_at: Option<chrono::DateTime<chrono::Utc>>,
    row_count: i64,
    notes: Option<String>,
}

impl ThresholdReleaseRaw {
    fn into_release(self) -> Result<ThresholdRelease> {
        Ok(ThresholdRelease {
            release_id: self.release_id,
            standard_name: StandardName::parse(&self.standard_name)?,
            release_code: self.release_code,
            jurisdiction: self.jurisdiction,
            source_authority: self.source_authority,
            document_title: self.document_title,
            document_url: self.document_url,
            publication_date: self.publication_date,
            effective_from: self.effective_from,
            effective_to: self.effective_to,
            review_status: ReviewStatus::parse(&self.review_status)?,
            imported_by: self.imported_by,
            imported_at: self.imported_at,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            published_by: self.published_by,
            published_at: self.published_at,
            row_count: self.row_count,
            notes: self.notes,
        })
    }
}

const RELEASE_COLUMNS: &str = "
    release_id, standard_name, release_code, jurisdiction, source_authority,
    document_title, document_url, publication_date, effective_from, effective_to,
    review_status, imported_by, imported_at, approved_by, approved_at,
    published_by, published_at, row_count, notes
";

pub fn list_threshold_releases(
    conn: &Connection,
    limit: usize,
    standard: Option<StandardName>,
) -> Result<Vec<ThresholdRelease>> {
    let sql = match standard {
        Some(_) => format!(
            "SELECT {RELEASE_COLUMNS} FROM regulatory_threshold_releases
             WHERE standard_name = ?1 ORDER BY imported_at DESC LIMIT ?2"
        ),
        None => format!(
            "SELECT {RELEASE_COLUMNS} FROM regulatory_threshold_releases
             ORDER BY imported_at DESC LIMIT ?1"
        ),
    };
    let mut statement = conn.prepare(&sql)?;
    let raws = match standard {
        Some(standard) => statement
            .query_map(
                rusqlite::params![standard.as_str(), limit as i64],
                release_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?,
        None => statement
            .query_map(rusqlite::params![limit as i64], release_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };
    raws.into_iter().map(ThresholdReleaseRaw::into_release).collect()
}

pub fn get_threshold_release(conn: &Connection, release_id: &str) -> Result<ReleaseDetail> {
    let sql = format!(
        "SELECT {RELEASE_COLUMNS} FROM regulatory_threshold_releases WHERE release_id = ?1"
    );
    let raw = conn
        .query_row(&sql, [release_id], release_from_row)
        .optional()?;
    let Some(raw) = raw else {
        return Err(Error::not_found("Release not found"));
    };
    let release = raw.into_release()?;

    let mut statement = conn.prepare(
        "
        SELECT value_id, release_id, product_category, parameter_code, parameter_name,
               limit_min, limit_max, unit, severity, source_clause, remarks
        FROM regulatory_threshold_values
        WHERE release_id = ?1
        ORDER BY product_category, parameter_code
        ",
    )?;
    let raw_rows = statement
        .query_map([release_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, Option<String>>(10)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut threshold_rows = Vec::with_capacity(raw_rows.len());
    for (
        value_id,
        release_id,
        product_category,
        parameter_code,
        parameter_name,
        limit_min,
        limit_max,
        unit,
        severity,
        source_clause,
        remarks,
    ) in raw_rows
    {
        threshold_rows.push(ThresholdValueRow {
            value_id,
            release_id,
            product_category,
            parameter_code,
            parameter_name,
            limit_min: decimal_from_store(limit_min)?,
            limit_max: decimal_from_store(limit_max)?,
            unit,
            severity: Severity::parse(&severity)
                .ok_or_else(|| Error::internal(format!("invalid severity in store: {severity}")))?,
            source_clause,
            remarks,
        });
    }

    Ok(ReleaseDetail {
        release,
        threshold_rows,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::audit::ledger_length;
    use crate::clock::FixedClock;
    use crate::requirements::{upsert_parameter_requirement, RequirementUpsert};
    use crate::store::open_in_memory;

    const CSV: &[u8] = b"product_category,parameter_name,parameter_code,unit,limit_max,severity,source_clause\n\
                         TRAD-NUTRI-500G,Aflatoxin B1,AFLA_B1,ppb,2,critical,Clause 4.2\n";

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap())
    }

    fn seed_requirement(conn: &mut Connection, clock: &dyn Clock) {
        upsert_parameter_requirement(
            conn,
            clock,
            "admin",
            &RequirementUpsert {
                product_category: "TRAD-NUTRI-500G".to_string(),
                parameter_code: "AFLA_B1".to_string(),
                parameter_name: "Aflatoxin B1".to_string(),
                canonical_unit: "ug/kg".to_string(),
                require_fssai: true,
                require_eu: false,
                require_codex: false,
                require_haccp_internal: false,
                is_mandatory: true,
                effective_from: "2026-01-01".parse().unwrap(),
                effective_to: None,
                source_note: None,
            },
        )
        .unwrap();
    }

    fn import_args(release_code: &str) -> ImportReleaseArgs {
        ImportReleaseArgs {
            standard_name: "FSSAI".to_string(),
            release_code: release_code.to_string(),
            document_title: "FSSAI contaminant limits".to_string(),
            effective_from: "2026-02-01".to_string(),
            imported_by: "qa-lead".to_string(),
            jurisdiction: Some("IN".to_string()),
            source_authority: "FSSAI".to_string(),
            document_url: None,
            publication_date: "2026-01-15".to_string(),
            effective_to: None,
            notes: None,
        }
    }

    fn setup() -> (FixedClock, Connection) {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        seed_requirement(&mut conn, &clock);
        (clock, conn)
    }

    #[test]
    fn import_creates_draft_release_with_normalized_units() {
        let (clock, mut conn) = setup();
        let summary =
            import_threshold_release(&mut conn, &clock, &import_args("FSSAI-2026-01"), CSV)
                .unwrap();
        assert_eq!(summary.review_status, ReviewStatus::Draft);
        assert_eq!(summary.row_count, 1);
        assert_eq!(summary.normalized_unit_rows, 1);

        let detail = get_threshold_release(&conn, &summary.release_id).unwrap();
        assert_eq!(detail.threshold_rows.len(), 1);
        assert_eq!(detail.threshold_rows[0].unit, "ug/kg");
        assert_eq!(detail.release.review_status, ReviewStatus::Draft);
    }

    #[test]
    fn import_refuses_ungoverned_standard() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        let err = import_threshold_release(&mut conn, &clock, &import_args("EU-2026-01"), CSV)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("No active mandatory requirement rows"));
        // Nothing persisted, including audit entries.
        assert_eq!(ledger_length(&conn).unwrap(), 0);
    }

    #[test]
    fn import_rejects_csv_errors_without_partial_writes() {
        let (clock, mut conn) = setup();
        let bad = b"product_category,parameter_name,unit,limit_max\nTRAD-NUTRI-500G,Aflatoxin B1,ppb,2\n";
        let before = ledger_length(&conn).unwrap();
        let err = import_threshold_release(&mut conn, &clock, &import_args("FSSAI-2026-01"), bad)
            .unwrap_err();
        assert!(err.to_string().contains("CSV validation failed"));
        assert!(err.to_string().contains("source_clause is required"));
        assert_eq!(ledger_length(&conn).unwrap(), before);
        assert!(list_threshold_releases(&conn, 10, None).unwrap().is_empty());
    }

    #[test]
    fn import_rejects_unit_mismatch_with_itemized_diff() {
        let (clock, mut conn) = setup();
        let mismatched = b"product_category,parameter_name,parameter_code,unit,limit_max,source_clause\n\
                           TRAD-NUTRI-500G,Aflatoxin B1,AFLA_B1,mg/kg,2,Clause 4.2\n";
        let err = import_threshold_release(
            &mut conn,
            &clock,
            &import_args("FSSAI-2026-01"),
            mismatched,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unit mismatches"));
        assert!(message.contains("TRAD-NUTRI-500G:AFLA_B1 expected ug/kg got mg/kg"));
    }

    #[test]
    fn duplicate_release_code_is_a_conflict() {
        let (clock, mut conn) = setup();
        import_threshold_release(&mut conn, &clock, &import_args("FSSAI-2026-01"), CSV).unwrap();
        let err = import_threshold_release(&mut conn, &clock, &import_args("FSSAI-2026-01"), CSV)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(err.to_string().contains("FSSAI-2026-01"));
    }

    #[test]
    fn approve_is_idempotent_and_guarded() {
        let (clock, mut conn) = setup();
        let summary =
            import_threshold_release(&mut conn, &clock, &import_args("FSSAI-2026-01"), CSV)
                .unwrap();

        let coverage = release_coverage_report(&conn, &summary.release_id).unwrap();
        assert!(coverage.ready_for_approval);

        let first =
            approve_threshold_release(&mut conn, &clock, &summary.release_id, "qa-head", None)
                .unwrap();
        assert!(!first.idempotent);

        let before = ledger_length(&conn).unwrap();
        let again =
            approve_threshold_release(&mut conn, &clock, &summary.release_id, "qa-head", None)
                .unwrap();
        assert!(again.idempotent);
        assert_eq!(ledger_length(&conn).unwrap(), before);

        publish_threshold_release(&mut conn, &clock, &summary.release_id, "qa-head").unwrap();
        let err =
            approve_threshold_release(&mut conn, &clock, &summary.release_id, "qa-head", None)
                .unwrap_err();
        assert!(err.to_string().contains("already published"));
    }

    #[test]
    fn publish_requires_approved_status() {
        let (clock, mut conn) = setup();
        let summary =
            import_threshold_release(&mut conn, &clock, &import_args("FSSAI-2026-01"), CSV)
                .unwrap();
        let err =
            publish_threshold_release(&mut conn, &clock, &summary.release_id, "qa-head")
                .unwrap_err();
        assert!(err.to_string().contains("must be approved before publish"));

        approve_threshold_release(&mut conn, &clock, &summary.release_id, "qa-head", None)
            .unwrap();
        let outcome =
            publish_threshold_release(&mut conn, &clock, &summary.release_id, "qa-head").unwrap();
        assert_eq!(outcome.inserted_rows, 1);
        assert_eq!(outcome.closed_previous_rows, 0);

        let err = publish_threshold_release(&mut conn, &clock, &summary.release_id, "qa-head")
            .unwrap_err();
        assert!(err.to_string().contains("must be approved before publish"));
    }

    #[test]
    fn sequential_publishes_leave_one_open_row_per_key() {
        let (clock, mut conn) = setup();
        let first =
            import_threshold_release(&mut conn, &clock, &import_args("FSSAI-2026-01"), CSV)
                .unwrap();
        approve_threshold_release(&mut conn, &clock, &first.release_id, "qa-head", None).unwrap();
        publish_threshold_release(&mut conn, &clock, &first.release_id, "qa-head").unwrap();

        let mut second_args = import_args("FSSAI-2026-02");
        second_args.effective_from = "2026-06-01".to_string();
        let second = import_threshold_release(&mut conn, &clock, &second_args, CSV).unwrap();
        approve_threshold_release(&mut conn, &clock, &second.release_id, "qa-head", None).unwrap();
        let outcome =
            publish_threshold_release(&mut conn, &clock, &second.release_id, "qa-head").unwrap();
        assert_eq!(outcome.closed_previous_rows, 1);
        assert_eq!(outcome.inserted_rows, 1);

        let open_rows: i64 = conn
            .query_row(
                "
                SELECT COUNT(*) FROM compliance_thresholds
                WHERE standard_name = 'FSSAI'
                  AND product_category = 'TRAD-NUTRI-500G'
                  AND parameter_code = 'AFLA_B1'
                  AND effective_to IS NULL
                ",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(open_rows, 1);

        let closed_to: Option<NaiveDate> = conn
            .query_row(
                "
                SELECT effective_to FROM compliance_thresholds
                WHERE effective_from = '2026-02-01'
                ",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(closed_to, Some("2026-05-31".parse().unwrap()));

        let active =
            list_active_thresholds(&conn, "2026-07-01".parse().unwrap(), None).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].source_ref, "FSSAI-2026-02:Clause 4.2");
        assert_eq!(active[0].unit, "ug/kg");
    }

    #[test]
    fn release_coverage_flags_empty_release() {
        let (clock, mut conn) = setup();
        let summary =
            import_threshold_release(&mut conn, &clock, &import_args("FSSAI-2026-01"), CSV)
                .unwrap();
        conn.execute(
            "DELETE FROM regulatory_threshold_values WHERE release_id = ?1",
            [&summary.release_id],
        )
        .unwrap();

        let coverage = release_coverage_report(&conn, &summary.release_id).unwrap();
        assert!(!coverage.ready_for_approval);
        assert_eq!(coverage.diagnostics, vec!["Release has no threshold rows"]);

        let err =
            approve_threshold_release(&mut conn, &clock, &summary.release_id, "qa-head", None)
                .unwrap_err();
        assert!(err.to_string().contains("no threshold rows"));
    }

    #[test]
    fn unknown_release_is_not_found() {
        let (_, conn) = setup();
        let err = release_coverage_report(&conn, "missing-id").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
