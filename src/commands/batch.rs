use std::fs;

use anyhow::{Context, Result};
use tracing::info;

use super::{open, print_json};
use crate::batch::{create_batch, record_quality_test};
use crate::cli::{CompareBatchArgs, IngestLabReportArgs, RecordTestArgs, RegisterBatchArgs};
use crate::clock::SystemClock;
use crate::compliance::batch_comparison;
use crate::lab::{ingest_lab_report, LabReportIngest};

pub fn register_batch(args: RegisterBatchArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let batch_id = create_batch(
        &mut conn,
        &clock,
        &args.actor,
        &args.batch_code,
        &args.product_sku,
        None,
    )?;
    info!(batch_id = %batch_id, batch_code = %args.batch_code, "batch registered");
    Ok(())
}

pub fn record_test(args: RecordTestArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let test_id = record_quality_test(
        &mut conn,
        &clock,
        &args.actor,
        &args.batch_code,
        &args.parameter_name,
        args.observed_value,
        &args.unit,
        None,
    )?;
    info!(test_id = %test_id, "quality test recorded");
    Ok(())
}

pub fn lab_report(args: IngestLabReportArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let report_text = fs::read_to_string(&args.report_path)
        .with_context(|| format!("failed to read {}", args.report_path.display()))?;

    let summary = ingest_lab_report(
        &mut conn,
        &clock,
        &LabReportIngest {
            batch_code: args.batch_code,
            uploaded_by: args.uploaded_by,
            lab_name: args.lab_name,
            fssai_approved: args.fssai_approved,
            report_text,
        },
    )?;
    print_json(&summary)
}

pub fn compare_batch(args: CompareBatchArgs) -> Result<()> {
    let conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let results = batch_comparison(&conn, &clock, &args.batch_code)?;
    print_json(&results)
}
