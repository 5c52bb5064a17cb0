use anyhow::Result;
use serde::Serialize;
use tracing::info;

use super::{open, print_json};
use crate::cli::{DbArgs, RequirementUpsertArgs};
use crate::clock::SystemClock;
use crate::requirements::{upsert_parameter_requirement, RequirementUpsert};

pub fn init_db(args: DbArgs) -> Result<()> {
    let _ = open(&args.db_path)?;
    info!(db_path = %args.db_path.display(), "database ready");
    Ok(())
}

pub fn requirement_upsert(args: RequirementUpsertArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;

    let requirement_id = upsert_parameter_requirement(
        &mut conn,
        &clock,
        &args.actor,
        &RequirementUpsert {
            product_category: args.product_category,
            parameter_code: args.parameter_code,
            parameter_name: args.parameter_name,
            canonical_unit: args.canonical_unit,
            require_fssai: args.require_fssai,
            require_eu: args.require_eu,
            require_codex: args.require_codex,
            require_haccp_internal: args.require_haccp_internal,
            is_mandatory: true,
            effective_from: args.effective_from.parse()?,
            effective_to: args.effective_to.as_deref().map(str::parse).transpose()?,
            source_note: args.source_note,
        },
    )?;

    info!(requirement_id = %requirement_id, "requirement upserted");
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    releases: i64,
    live_thresholds: i64,
    open_thresholds: i64,
    requirements: i64,
    batches: i64,
    quality_tests: i64,
    ccp_logs: i64,
    open_alerts: i64,
    audit_entries: i64,
    chain_head: Option<String>,
}

pub fn status(args: DbArgs) -> Result<()> {
    let conn = open(&args.db_path)?;
    let count = |sql: &str| -> Result<i64> {
        Ok(conn.query_row(sql, [], |row| row.get(0))?)
    };

    let report = StatusReport {
        releases: count("SELECT COUNT(*) FROM regulatory_threshold_releases")?,
        live_thresholds: count("SELECT COUNT(*) FROM compliance_thresholds")?,
        open_thresholds: count(
            "SELECT COUNT(*) FROM compliance_thresholds WHERE effective_to IS NULL",
        )?,
        requirements: count("SELECT COUNT(*) FROM regulatory_parameter_requirements")?,
        batches: count("SELECT COUNT(*) FROM production_batches")?,
        quality_tests: count("SELECT COUNT(*) FROM quality_test_records")?,
        ccp_logs: count("SELECT COUNT(*) FROM ccp_logs")?,
        open_alerts: count("SELECT COUNT(*) FROM alerts WHERE status = 'open'")?,
        audit_entries: count("SELECT COUNT(*) FROM audit_logs")?,
        chain_head: conn
            .query_row(
                "SELECT event_hash FROM audit_logs ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .ok(),
    };
    print_json(&report)
}
