use std::fs;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use super::{open, print_json};
use crate::cli::{
    ActiveCoverageArgs, ApproveReleaseArgs, ImportReleaseCliArgs, PublishReleaseArgs,
    ReleaseCoverageArgs,
};
use crate::clock::{Clock, SystemClock};
use crate::coverage::{active_coverage_report, release_coverage_report};
use crate::regulatory::{
    approve_threshold_release, import_threshold_release, publish_threshold_release,
    ImportReleaseArgs,
};

pub fn import_release(args: ImportReleaseCliArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;

    let csv_bytes = fs::read(&args.csv_path)
        .with_context(|| format!("failed to read {}", args.csv_path.display()))?;

    let summary = import_threshold_release(
        &mut conn,
        &clock,
        &ImportReleaseArgs {
            standard_name: args.standard,
            release_code: args.release_code,
            document_title: args.document_title,
            effective_from: args.effective_from,
            imported_by: args.imported_by,
            jurisdiction: args.jurisdiction,
            source_authority: args.source_authority,
            document_url: args.document_url,
            publication_date: args.publication_date,
            effective_to: args.effective_to,
            notes: args.notes,
        },
        &csv_bytes,
    )?;
    print_json(&summary)
}

pub fn approve_release(args: ApproveReleaseArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let outcome = approve_threshold_release(
        &mut conn,
        &clock,
        &args.release_id,
        &args.approved_by,
        args.notes.as_deref(),
    )?;
    print_json(&outcome)
}

pub fn publish_release(args: PublishReleaseArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let outcome =
        publish_threshold_release(&mut conn, &clock, &args.release_id, &args.published_by)?;
    print_json(&outcome)
}

pub fn release_coverage(args: ReleaseCoverageArgs) -> Result<()> {
    let conn = open(&args.db.db_path)?;
    let report = release_coverage_report(&conn, &args.release_id)?;
    print_json(&report)
}

pub fn active_coverage(args: ActiveCoverageArgs) -> Result<()> {
    let conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let as_of: NaiveDate = match args.as_of.as_deref() {
        Some(raw) => raw.parse()?,
        None => clock.today(),
    };
    let report = active_coverage_report(&conn, as_of, args.product_category.as_deref())?;
    print_json(&report)
}
