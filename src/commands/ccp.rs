use std::str::FromStr;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use tracing::info;

use super::{open, print_json};
use crate::ccp::{ingest_ccp_log, upsert_ccp_rule, CcpLogIngest, CcpRuleUpsert};
use crate::cli::{AnomalyScanArgs, CcpRuleArgs, IngestCcpArgs};
use crate::clock::SystemClock;
use crate::model::Severity;

fn parse_limit(raw: Option<&str>) -> Result<Option<Decimal>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => match Decimal::from_str(text) {
            Ok(value) => Ok(Some(value)),
            Err(_) => bail!("invalid limit value '{text}'"),
        },
    }
}

pub fn ccp_rule(args: CcpRuleArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let Some(severity) = Severity::parse(&args.severity.to_lowercase()) else {
        bail!("severity must be one of critical, high, low, medium");
    };

    let rule_id = upsert_ccp_rule(
        &mut conn,
        &clock,
        &args.actor,
        &CcpRuleUpsert {
            ccp_code: args.ccp_code,
            metric_name: args.metric_name,
            unit: args.unit,
            limit_min: parse_limit(args.limit_min.as_deref())?,
            limit_max: parse_limit(args.limit_max.as_deref())?,
            warn_margin_pct: args.warn_margin_pct,
            severity,
            active: true,
        },
    )?;
    info!(rule_id = %rule_id, "ccp rule created");
    Ok(())
}

pub fn ingest_ccp(args: IngestCcpArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let outcome = ingest_ccp_log(
        &mut conn,
        &clock,
        &CcpLogIngest {
            batch_code: args.batch_code,
            ccp_code: args.ccp_code,
            metric_name: args.metric_name,
            metric_value: args.metric_value,
            unit: args.unit,
            measured_at: None,
            operator_id: args.operator_id,
            source: args.source,
        },
    )?;
    print_json(&outcome)
}

pub fn anomaly_scan(args: AnomalyScanArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let summary = crate::anomaly::run_anomaly_scan(
        &mut conn,
        &clock,
        args.lookback_hours,
        args.z_threshold,
        &args.actor,
    )?;
    print_json(&summary)
}
