//! Versioned lab-report ingestion. The PDF-to-text step belongs to an
//! external collaborator; this path receives the raw text, hashes it for
//! traceability, extracts parameter candidates, and persists them as quality
//! observations in one transaction.

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::append_audit_event;
use crate::batch::require_batch;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::params::parse_lab_text;
use crate::util::sha256_hex;

#[derive(Debug, Clone)]
pub struct LabReportIngest {
    pub batch_code: String,
    pub uploaded_by: String,
    pub lab_name: String,
    pub fssai_approved: bool,
    pub report_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabReportSummary {
    pub report_id: String,
    pub batch_code: String,
    pub version_no: i64,
    pub supersedes_report_id: Option<String>,
    pub report_hash: String,
    pub extracted_rows: usize,
    pub warnings: Vec<String>,
}

pub fn ingest_lab_report(
    conn: &mut Connection,
    clock: &dyn Clock,
    ingest: &LabReportIngest,
) -> Result<LabReportSummary> {
    let lab_name = ingest.lab_name.trim();
    if lab_name.is_empty() {
        return Err(Error::validation("lab_name is required"));
    }

    let (batch_id, _) = require_batch(conn, &ingest.batch_code)?;
    let report_hash = sha256_hex(ingest.report_text.as_bytes());

    let previous: Option<(String, i64)> = conn
        .query_row(
            "
            SELECT report_id, version_no
            FROM lab_reports
            WHERE batch_id = ?1 AND lab_name = ?2
            ORDER BY version_no DESC
            LIMIT 1
            ",
            rusqlite::params![batch_id, lab_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let version_no = previous.as_ref().map_or(1, |(_, version)| version + 1);
    let supersedes = previous.map(|(report_id, _)| report_id);

    let extracted = parse_lab_text(&ingest.report_text);
    let report_id = Uuid::new_v4().to_string();
    let now = clock.now();

    let tx = conn.transaction()?;
    tx.execute(
        "
        INSERT INTO lab_reports (
          report_id, batch_id, report_hash, lab_name, fssai_approved,
          version_no, uploaded_by, uploaded_at, supersedes_report_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ",
        rusqlite::params![
            report_id,
            batch_id,
            report_hash,
            lab_name,
            ingest.fssai_approved,
            version_no,
            ingest.uploaded_by,
            now,
            supersedes,
        ],
    )?;

    for row in &extracted {
        tx.execute(
            "
            INSERT INTO quality_test_records (
              test_id, batch_id, report_id, parameter_code, parameter_name,
              observed_value, unit, tested_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                batch_id,
                report_id,
                row.parameter_code,
                row.parameter_name,
                row.observed_value,
                row.unit,
                now,
            ],
        )?;
    }

    append_audit_event(
        &tx,
        clock,
        &ingest.uploaded_by,
        "LAB_REPORT_INGESTED",
        "lab_report",
        &report_id,
        serde_json::json!({
            "batch_code": ingest.batch_code,
            "lab_name": lab_name,
            "version_no": version_no,
            "report_hash": report_hash,
            "extracted_rows": extracted.len(),
        }),
    )?;
    tx.commit()?;

    let mut warnings = Vec::new();
    if ingest.report_text.trim().is_empty() {
        warnings.push(
            "No extractable report text supplied; upstream extraction may have failed."
                .to_string(),
        );
    }
    if extracted.is_empty() {
        warnings.push("No structured parameter rows were extracted from report text.".to_string());
    }

    Ok(LabReportSummary {
        report_id,
        batch_code: ingest.batch_code.clone(),
        version_no,
        supersedes_report_id: supersedes,
        report_hash,
        extracted_rows: extracted.len(),
        warnings,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabReportRow {
    pub report_id: String,
    pub batch_code: String,
    pub lab_name: String,
    pub version_no: i64,
    pub supersedes_report_id: Option<String>,
    pub report_hash: String,
    pub uploaded_by: String,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
}

pub fn list_batch_reports(conn: &Connection, batch_code: &str) -> Result<Vec<LabReportRow>> {
    let mut statement = conn.prepare(
        "
        SELECT lr.report_id, pb.batch_code, lr.lab_name, lr.version_no,
               lr.supersedes_report_id, lr.report_hash, lr.uploaded_by, lr.uploaded_at
        FROM lab_reports lr
        JOIN production_batches pb ON pb.batch_id = lr.batch_id
        WHERE pb.batch_code = ?1
        ORDER BY lr.lab_name, lr.version_no DESC
        ",
    )?;
    let rows = statement
        .query_map([batch_code], |row| {
            Ok(LabReportRow {
                report_id: row.get(0)?,
                batch_code: row.get(1)?,
                lab_name: row.get(2)?,
                version_no: row.get(3)?,
                supersedes_report_id: row.get(4)?,
                report_hash: row.get(5)?,
                uploaded_by: row.get(6)?,
                uploaded_at: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
