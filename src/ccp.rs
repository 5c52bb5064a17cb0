//! Critical-control-point monitoring: rule-driven deviation and warning
//! alerts on sensor readings, an append path for the readings themselves,
//! and alert acknowledgement.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::append_audit_event;
use crate::batch::require_batch;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::Severity;
use crate::regulatory::decimal_from_store;
use crate::units::normalize_unit;

fn dec_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

pub(crate) fn is_outside(
    value: f64,
    limit_min: Option<Decimal>,
    limit_max: Option<Decimal>,
) -> bool {
    if let Some(min) = limit_min {
        if value < dec_f64(min) {
            return true;
        }
    }
    if let Some(max) = limit_max {
        if value > dec_f64(max) {
            return true;
        }
    }
    false
}

pub(crate) fn is_near(
    value: f64,
    limit_min: Option<Decimal>,
    limit_max: Option<Decimal>,
    warn_margin_pct: f64,
) -> bool {
    let margin = warn_margin_pct / 100.0;
    if let Some(max) = limit_max {
        if value >= dec_f64(max) * (1.0 - margin) {
            return true;
        }
    }
    if let Some(min) = limit_min {
        if value <= dec_f64(min) * (1.0 + margin) {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone)]
pub struct CcpRuleUpsert {
    pub ccp_code: String,
    pub metric_name: String,
    pub unit: String,
    pub limit_min: Option<Decimal>,
    pub limit_max: Option<Decimal>,
    pub warn_margin_pct: f64,
    pub severity: Severity,
    pub active: bool,
}

pub fn upsert_ccp_rule(
    conn: &mut Connection,
    clock: &dyn Clock,
    actor_id: &str,
    rule: &CcpRuleUpsert,
) -> Result<String> {
    let ccp_code = rule.ccp_code.trim();
    if ccp_code.is_empty() {
        return Err(Error::validation("ccp_code is required"));
    }
    let metric_name = rule.metric_name.trim();
    if metric_name.is_empty() {
        return Err(Error::validation("metric_name is required"));
    }
    if rule.limit_min.is_none() && rule.limit_max.is_none() {
        return Err(Error::validation(
            "at least one of limit_min/limit_max is required",
        ));
    }

    let rule_id = Uuid::new_v4().to_string();
    let unit = normalize_unit(&rule.unit);

    let tx = conn.transaction()?;
    tx.execute(
        "
        INSERT INTO ccp_rules (
          rule_id, ccp_code, metric_name, unit, limit_min, limit_max,
          warn_margin_pct, severity, active, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ",
        rusqlite::params![
            rule_id,
            ccp_code,
            metric_name,
            unit,
            rule.limit_min.map(|value| value.to_string()),
            rule.limit_max.map(|value| value.to_string()),
            rule.warn_margin_pct,
            rule.severity.as_str(),
            rule.active,
            clock.now(),
        ],
    )?;
    append_audit_event(
        &tx,
        clock,
        actor_id,
        "CCP_RULE_UPSERTED",
        "ccp_rule",
        &rule_id,
        serde_json::json!({
            "ccp_code": ccp_code,
            "metric_name": metric_name,
            "unit": unit,
            "warn_margin_pct": rule.warn_margin_pct,
        }),
    )?;
    tx.commit()?;

    Ok(rule_id)
}

#[derive(Debug, Clone)]
pub struct CcpLogIngest {
    pub batch_code: String,
    pub ccp_code: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub unit: String,
    pub measured_at: Option<DateTime<Utc>>,
    pub operator_id: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSummary {
    pub alert_id: String,
    pub alert_type: String,
    pub severity: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcpIngestOutcome {
    pub ccp_log_id: String,
    pub batch_code: String,
    pub ccp_code: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub unit: String,
    pub alerts_generated: Vec<AlertSummary>,
}

struct RuleRow {
    rule_id: String,
    limit_min: Option<Decimal>,
    limit_max: Option<Decimal>,
    warn_margin_pct: f64,
}

/// Persists one sensor reading and raises a `CCP_DEVIATION` (critical) or
/// `CCP_WARNING` alert per matching active rule, each audit-logged, all in
/// one transaction with the reading itself.
pub fn ingest_ccp_log(
    conn: &mut Connection,
    clock: &dyn Clock,
    ingest: &CcpLogIngest,
) -> Result<CcpIngestOutcome> {
    let (batch_id, _) = require_batch(conn, &ingest.batch_code)?;
    let ccp_log_id = Uuid::new_v4().to_string();
    let unit = normalize_unit(&ingest.unit);
    let measured_at = ingest.measured_at.unwrap_or_else(|| clock.now());
    let actor = ingest.operator_id.as_deref().unwrap_or("system");

    let tx = conn.transaction()?;
    tx.execute(
        "
        INSERT INTO ccp_logs (
          ccp_log_id, batch_id, ccp_code, metric_name, metric_value, unit,
          measured_at, operator_id, source
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ",
        rusqlite::params![
            ccp_log_id,
            batch_id,
            ingest.ccp_code,
            ingest.metric_name,
            ingest.metric_value,
            unit,
            measured_at,
            ingest.operator_id,
            ingest.source,
        ],
    )?;

    let rules: Vec<RuleRow> = {
        let mut statement = tx.prepare(
            "
            SELECT rule_id, limit_min, limit_max, warn_margin_pct
            FROM ccp_rules
            WHERE active = 1
              AND ccp_code = ?1
              AND metric_name = ?2
              AND unit = ?3
            ORDER BY created_at DESC
            ",
        )?;
        let raw = statement
            .query_map(
                rusqlite::params![ingest.ccp_code, ingest.metric_name, unit],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut rules = Vec::with_capacity(raw.len());
        for (rule_id, limit_min, limit_max, warn_margin_pct) in raw {
            rules.push(RuleRow {
                rule_id,
                limit_min: decimal_from_store(limit_min)?,
                limit_max: decimal_from_store(limit_max)?,
                warn_margin_pct,
            });
        }
        rules
    };

    let mut alerts_generated = Vec::new();
    for rule in &rules {
        let alert_type = if is_outside(ingest.metric_value, rule.limit_min, rule.limit_max) {
            "CCP_DEVIATION"
        } else if is_near(
            ingest.metric_value,
            rule.limit_min,
            rule.limit_max,
            rule.warn_margin_pct,
        ) {
            "CCP_WARNING"
        } else {
            continue;
        };

        let severity = if alert_type == "CCP_DEVIATION" {
            "critical"
        } else {
            "warning"
        };
        let alert_id = Uuid::new_v4().to_string();
        let title = format!("{alert_type} at {}:{}", ingest.ccp_code, ingest.metric_name);
        let message = format!(
            "Value {} {} for {}/{} triggered rule bounds [{:?}, {:?}].",
            ingest.metric_value,
            unit,
            ingest.ccp_code,
            ingest.metric_name,
            rule.limit_min,
            rule.limit_max
        );
        let details = serde_json::json!({
            "rule_id": rule.rule_id,
            "metric_value": ingest.metric_value,
            "unit": unit,
            "limit_min": rule.limit_min.map(dec_f64),
            "limit_max": rule.limit_max.map(dec_f64),
            "warn_margin_pct": rule.warn_margin_pct,
            "batch_code": ingest.batch_code,
        });

        tx.execute(
            "
            INSERT INTO alerts (
              alert_id, batch_id, ccp_log_id, alert_type, severity, status,
              title, message, details, detected_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6, ?7, ?8, ?9)
            ",
            rusqlite::params![
                alert_id,
                batch_id,
                ccp_log_id,
                alert_type,
                severity,
                title,
                message,
                details.to_string(),
                clock.now(),
            ],
        )?;

        let mut audit_payload = details;
        audit_payload["alert_type"] = serde_json::json!(alert_type);
        audit_payload["severity"] = serde_json::json!(severity);
        append_audit_event(&tx, clock, actor, "CCP_ALERT_CREATED", "alert", &alert_id, audit_payload)?;

        alerts_generated.push(AlertSummary {
            alert_id,
            alert_type: alert_type.to_string(),
            severity: severity.to_string(),
            title,
        });
    }

    append_audit_event(
        &tx,
        clock,
        actor,
        "CCP_LOG_INGESTED",
        "ccp_log",
        &ccp_log_id,
        serde_json::json!({
            "batch_code": ingest.batch_code,
            "ccp_code": ingest.ccp_code,
            "metric_name": ingest.metric_name,
            "metric_value": ingest.metric_value,
            "unit": unit,
            "source": ingest.source,
            "generated_alerts": alerts_generated.len(),
        }),
    )?;
    tx.commit()?;

    Ok(CcpIngestOutcome {
        ccp_log_id,
        batch_code: ingest.batch_code.clone(),
        ccp_code: ingest.ccp_code.clone(),
        metric_name: ingest.metric_name.clone(),
        metric_value: ingest.metric_value,
        unit,
        alerts_generated,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRow {
    pub alert_id: String,
    pub batch_code: Option<String>,
    pub alert_type: String,
    pub severity: String,
    pub status: String,
    pub title: String,
    pub detected_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
}

pub fn list_alerts(conn: &Connection, status: &str, limit: usize) -> Result<Vec<AlertRow>> {
    let mut statement = conn.prepare(
        "
        SELECT a.alert_id, pb.batch_code, a.alert_type, a.severity, a.status,
               a.title, a.detected_at, a.acknowledged_at, a.acknowledged_by
        FROM alerts a
        LEFT JOIN production_batches pb ON pb.batch_id = a.batch_id
        WHERE (?1 = 'all' OR a.status = ?1)
        ORDER BY a.detected_at DESC
        LIMIT ?2
        ",
    )?;
    let rows = statement
        .query_map(rusqlite::params![status, limit as i64], |row| {
            Ok(AlertRow {
                alert_id: row.get(0)?,
                batch_code: row.get(1)?,
                alert_type: row.get(2)?,
                severity: row.get(3)?,
                status: row.get(4)?,
                title: row.get(5)?,
                detected_at: row.get(6)?,
                acknowledged_at: row.get(7)?,
                acknowledged_by: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn acknowledge_alert(
    conn: &mut Connection,
    clock: &dyn Clock,
    alert_id: &str,
    acknowledged_by: &str,
) -> Result<AlertRow> {
    let existing: Option<(String, Option<String>)> = conn
        .query_row(
            "
            SELECT a.status, pb.batch_code
            FROM alerts a
            LEFT JOIN production_batches pb ON pb.batch_id = a.batch_id
            WHERE a.alert_id = ?1
            ",
            [alert_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((previous_status, batch_code)) = existing else {
        return Err(Error::not_found(format!("Alert not found: {alert_id}")));
    };

    let tx = conn.transaction()?;
    tx.execute(
        "
        UPDATE alerts
        SET status = 'acknowledged', acknowledged_at = ?2, acknowledged_by = ?3
        WHERE alert_id = ?1
        ",
        rusqlite::params![alert_id, clock.now(), acknowledged_by],
    )?;
    append_audit_event(
        &tx,
        clock,
        acknowledged_by,
        "CCP_ALERT_ACKNOWLEDGED",
        "alert",
        alert_id,
        serde_json::json!({
            "batch_code": batch_code,
            "previous_status": previous_status,
        }),
    )?;
    tx.commit()?;

    let updated = conn.query_row(
        "
        SELECT a.alert_id, pb.batch_code, a.alert_type, a.severity, a.status,
               a.title, a.detected_at, a.acknowledged_at, a.acknowledged_by
        FROM alerts a
        LEFT JOIN production_batches pb ON pb.batch_id = a.batch_id
        WHERE a.alert_id = ?1
        ",
        [alert_id],
        |row| {
            Ok(AlertRow {
                alert_id: row.get(0)?,
                batch_code: row.get(1)?,
                alert_type: row.get(2)?,
                severity: row.get(3)?,
                status: row.get(4)?,
                title: row.get(5)?,
                detected_at: row.get(6)?,
                acknowledged_at: row.get(7)?,
                acknowledged_by: row.get(8)?,
            })
        },
    )?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::batch::create_batch;
    use crate::clock::FixedClock;
    use crate::store::open_in_memory;

    fn dec(raw: &str) -> Decimal {
        raw.parse().unwrap()
    }

    #[test]
    fn bound_checks_match_rule_semantics() {
        assert!(is_outside(70.0, Some(dec("55")), Some(dec("65"))));
        assert!(!is_outside(60.0, Some(dec("55")), Some(dec("65"))));
        assert!(is_near(64.0, Some(dec("55")), Some(dec("65")), 10.0));
        assert!(is_near(60.0, Some(dec("55")), Some(dec("65")), 10.0));
        assert!(!is_near(61.0, Some(dec("50")), Some(dec("70")), 10.0));
    }

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 3, 3, 14, 0, 0).unwrap())
    }

    fn setup() -> (FixedClock, Connection) {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        create_batch(&mut conn, &clock, "op", "BATCH-1", "SKU-1", None).unwrap();
        upsert_ccp_rule(
            &mut conn,
            &clock,
            "admin",
            &CcpRuleUpsert {
                ccp_code: "CCP-2".to_string(),
                metric_name: "core_temp".to_string(),
                unit: "c".to_string(),
                limit_min: Some(dec("55")),
                limit_max: Some(dec("65")),
                warn_margin_pct: 10.0,
                severity: Severity::Critical,
                active: true,
            },
        )
        .unwrap();
        (clock, conn)
    }

    fn reading(value: f64) -> CcpLogIngest {
        CcpLogIngest {
            batch_code: "BATCH-1".to_string(),
            ccp_code: "CCP-2".to_string(),
            metric_name: "core_temp".to_string(),
            metric_value: value,
            unit: "c".to_string(),
            measured_at: None,
            operator_id: Some("op-7".to_string()),
            source: "sensor".to_string(),
        }
    }

    #[test]
    fn out_of_bounds_reading_raises_critical_deviation() {
        let (clock, mut conn) = setup();
        let outcome = ingest_ccp_log(&mut conn, &clock, &reading(70.0)).unwrap();
        assert_eq!(outcome.alerts_generated.len(), 1);
        assert_eq!(outcome.alerts_generated[0].alert_type, "CCP_DEVIATION");
        assert_eq!(outcome.alerts_generated[0].severity, "critical");
    }

    #[test]
    fn near_limit_reading_raises_warning_and_in_band_raises_none() {
        let (clock, mut conn) = setup();
        let warning = ingest_ccp_log(&mut conn, &clock, &reading(64.0)).unwrap();
        assert_eq!(warning.alerts_generated.len(), 1);
        assert_eq!(warning.alerts_generated[0].alert_type, "CCP_WARNING");

        // Mid-band: outside both margins (55*1.1 = 60.5, 65*0.9 = 58.5 means
        // the margins overlap here, so pick a rule with wider spread).
        let mut conn2 = open_in_memory(&clock).unwrap();
        create_batch(&mut conn2, &clock, "op", "BATCH-1", "SKU-1", None).unwrap();
        upsert_ccp_rule(
            &mut conn2,
            &clock,
            "admin",
            &CcpRuleUpsert {
                ccp_code: "CCP-2".to_string(),
                metric_name: "core_temp".to_string(),
                unit: "c".to_string(),
                limit_min: Some(dec("50")),
                limit_max: Some(dec("70")),
                warn_margin_pct: 10.0,
                severity: Severity::Critical,
                active: true,
            },
        )
        .unwrap();
        let quiet = ingest_ccp_log(&mut conn2, &clock, &reading(60.0)).unwrap();
        assert!(quiet.alerts_generated.is_empty());
    }

    #[test]
    fn acknowledge_transitions_alert_and_audits() {
        let (clock, mut conn) = setup();
        let outcome = ingest_ccp_log(&mut conn, &clock, &reading(70.0)).unwrap();
        let alert_id = outcome.alerts_generated[0].alert_id.clone();

        let acknowledged = acknowledge_alert(&mut conn, &clock, &alert_id, "qa-head").unwrap();
        assert_eq!(acknowledged.status, "acknowledged");
        assert_eq!(acknowledged.acknowledged_by.as_deref(), Some("qa-head"));

        let open = list_alerts(&conn, "open", 10).unwrap();
        assert!(open.is_empty());
        let err = acknowledge_alert(&mut conn, &clock, "missing", "qa-head").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
