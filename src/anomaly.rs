//! Statistical process-drift detection over CCP sensor readings. Each
//! (ccp_code, metric, unit) series keeps a rolling baseline of the previous
//! readings; readings inside the detection window whose z-score clears the
//! threshold become anomaly events plus open alerts.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::append_audit_event;
use crate::clock::Clock;
use crate::error::Result;

const BASELINE_WINDOW: usize = 20;
const MIN_BASELINE_SAMPLES: usize = 10;
const HISTORY_DAYS: i64 = 30;
const CRITICAL_Z: f64 = 4.0;

pub const DEFAULT_LOOKBACK_HOURS: i64 = 72;
pub const DEFAULT_Z_THRESHOLD: f64 = 2.5;

fn mean(values: &VecDeque<f64>) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator).
fn stdev(values: &VecDeque<f64>) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mu = mean(values);
    let variance =
        values.iter().map(|value| (value - mu).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyScanSummary {
    pub created_anomalies: usize,
    pub lookback_hours: i64,
    pub z_threshold: f64,
}

struct ReadingRow {
    ccp_log_id: String,
    batch_id: String,
    batch_code: String,
    ccp_code: String,
    metric_name: String,
    unit: String,
    metric_value: f64,
    measured_at: DateTime<Utc>,
}

/// Scans the last thirty days of readings in measurement order, flagging
/// drift only inside the lookback window and only once a series has enough
/// baseline samples. Re-running a scan over the same readings is safe: the
/// per-reading uniqueness constraint suppresses duplicates.
pub fn run_anomaly_scan(
    conn: &mut Connection,
    clock: &dyn Clock,
    lookback_hours: i64,
    z_threshold: f64,
    actor_id: &str,
) -> Result<AnomalyScanSummary> {
    let now = clock.now();
    let history_start = now - Duration::days(HISTORY_DAYS);
    let detection_cutoff = now - Duration::hours(lookback_hours);

    let rows: Vec<ReadingRow> = {
        let mut statement = conn.prepare(
            "
            SELECT l.ccp_log_id, l.batch_id, b.batch_code, l.ccp_code,
                   l.metric_name, l.unit, l.metric_value, l.measured_at
            FROM ccp_logs l
            JOIN production_batches b ON b.batch_id = l.batch_id
            WHERE l.measured_at >= ?1
            ORDER BY l.measured_at ASC
            ",
        )?;
        statement
            .query_map([history_start], |row| {
                Ok(ReadingRow {
                    ccp_log_id: row.get(0)?,
                    batch_id: row.get(1)?,
                    batch_code: row.get(2)?,
                    ccp_code: row.get(3)?,
                    metric_name: row.get(4)?,
                    unit: row.get(5)?,
                    metric_value: row.get(6)?,
                    measured_at: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    let mut baseline: HashMap<(String, String, String), VecDeque<f64>> = HashMap::new();
    let mut created = 0_usize;

    let tx = conn.transaction()?;
    for row in &rows {
        let key = (
            row.ccp_code.clone(),
            row.metric_name.clone(),
            row.unit.clone(),
        );
        let history = baseline.entry(key).or_default();

        if row.measured_at >= detection_cutoff && history.len() >= MIN_BASELINE_SAMPLES {
            let mu = mean(history);
            let sigma = stdev(history);
            if sigma > 0.0 {
                let z = (row.metric_value - mu) / sigma;
                if z.abs() >= z_threshold {
                    let severity = if z.abs() >= CRITICAL_Z {
                        "critical"
                    } else {
                        "warning"
                    };
                    let details = serde_json::json!({
                        "batch_code": row.batch_code,
                        "unit": row.unit,
                        "history_window": history.len(),
                        "lookback_hours": lookback_hours,
                        "z_threshold": z_threshold,
                    });

                    let inserted = tx.execute(
                        "
                        INSERT INTO anomaly_events (
                          anomaly_id, source_ccp_log_id, batch_id, anomaly_type,
                          metric_name, ccp_code, observed_value, baseline_mean,
                          baseline_stddev, z_score, severity, details, detected_at
                        ) VALUES (?1, ?2, ?3, 'PROCESS_DRIFT', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                        ON CONFLICT(source_ccp_log_id, anomaly_type) DO NOTHING
                        ",
                        rusqlite::params![
                            Uuid::new_v4().to_string(),
                            row.ccp_log_id,
                            row.batch_id,
                            row.metric_name,
                            row.ccp_code,
                            row.metric_value,
                            mu,
                            sigma,
                            z,
                            severity,
                            details.to_string(),
                            now,
                        ],
                    )?;

                    if inserted > 0 {
                        let mut alert_details = details;
                        alert_details["z_score"] =
                            serde_json::json!((z * 10_000.0).round() / 10_000.0);
                        tx.execute(
                            "
                            INSERT INTO alerts (
                              alert_id, batch_id, ccp_log_id, alert_type, severity, status,
                              title, message, details, detected_at
                            ) VALUES (?1, ?2, ?3, 'PROCESS_ANOMALY', ?4, 'open', ?5, ?6, ?7, ?8)
                            ",
                            rusqlite::params![
                                Uuid::new_v4().to_string(),
                                row.batch_id,
                                row.ccp_log_id,
                                severity,
                                format!("Anomaly at {}:{}", row.ccp_code, row.metric_name),
                                format!(
                                    "Observed {} {} deviates from baseline (z={:.2}).",
                                    row.metric_value, row.unit, z
                                ),
                                alert_details.to_string(),
                                now,
                            ],
                        )?;
                        created += 1;
                    }
                }
            }
        }

        if history.len() == BASELINE_WINDOW {
            history.pop_front();
        }
        history.push_back(row.metric_value);
    }

    append_audit_event(
        &tx,
        clock,
        actor_id,
        "ANOMALY_SCAN_RUN",
        "anomaly_scan",
        &Uuid::new_v4().to_string(),
        serde_json::json!({
            "lookback_hours": lookback_hours,
            "z_threshold": z_threshold,
            "created": created,
        }),
    )?;
    tx.commit()?;

    Ok(AnomalyScanSummary {
        created_anomalies: created,
        lookback_hours,
        z_threshold,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRow {
    pub anomaly_id: String,
    pub batch_code: Option<String>,
    pub anomaly_type: String,
    pub ccp_code: String,
    pub metric_name: String,
    pub observed_value: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub z_score: f64,
    pub severity: String,
    pub detected_at: DateTime<Utc>,
}

pub fn list_anomalies(conn: &Connection, limit: usize) -> Result<Vec<AnomalyRow>> {
    let mut statement = conn.prepare(
        "
        SELECT ae.anomaly_id, b.batch_code, ae.anomaly_type, ae.ccp_code,
               ae.metric_name, ae.observed_value, ae.baseline_mean,
               ae.baseline_stddev, ae.z_score, ae.severity, ae.detected_at
        FROM anomaly_events ae
        LEFT JOIN production_batches b ON b.batch_id = ae.batch_id
        ORDER BY ae.detected_at DESC
        LIMIT ?1
        ",
    )?;
    let rows = statement
        .query_map([limit as i64], |row| {
            Ok(AnomalyRow {
                anomaly_id: row.get(0)?,
                batch_code: row.get(1)?,
                anomaly_type: row.get(2)?,
                ccp_code: row.get(3)?,
                metric_name: row.get(4)?,
                observed_value: row.get(5)?,
                baseline_mean: row.get(6)?,
                baseline_stddev: row.get(7)?,
                z_score: row.get(8)?,
                severity: row.get(9)?,
                detected_at: row.get(10)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::batch::create_batch;
    use crate::ccp::{ingest_ccp_log, CcpLogIngest};
    use crate::clock::FixedClock;
    use crate::store::open_in_memory;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap())
    }

    fn seed_readings(conn: &mut Connection, clock: &FixedClock, values: &[f64]) {
        create_batch(conn, clock, "op", "BATCH-1", "SKU-1", None).unwrap();
        let start = clock.0 - Duration::hours(values.len() as i64);
        for (index, value) in values.iter().enumerate() {
            ingest_ccp_log(
                conn,
                clock,
                &CcpLogIngest {
                    batch_code: "BATCH-1".to_string(),
                    ccp_code: "CCP-2".to_string(),
                    metric_name: "core_temp".to_string(),
                    metric_value: *value,
                    unit: "c".to_string(),
                    measured_at: Some(start + Duration::hours(index as i64)),
                    operator_id: None,
                    source: "sensor".to_string(),
                },
            )
            .unwrap();
        }
    }

    #[test]
    fn scan_flags_spike_after_stable_baseline() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        let mut values: Vec<f64> = (0..12).map(|i| 60.0 + f64::from(i % 3) * 0.2).collect();
        values.push(75.0);
        seed_readings(&mut conn, &clock, &values);

        let summary = run_anomaly_scan(
            &mut conn,
            &clock,
            DEFAULT_LOOKBACK_HOURS,
            DEFAULT_Z_THRESHOLD,
            "system",
        )
        .unwrap();
        assert_eq!(summary.created_anomalies, 1);

        let anomalies = list_anomalies(&conn, 10).unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, "critical");
        assert_eq!(anomalies[0].observed_value, 75.0);
        assert!(anomalies[0].z_score.abs() >= DEFAULT_Z_THRESHOLD);
    }

    #[test]
    fn rescan_does_not_duplicate_anomalies() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        let mut values: Vec<f64> = (0..12).map(|i| 60.0 + f64::from(i % 3) * 0.2).collect();
        values.push(75.0);
        seed_readings(&mut conn, &clock, &values);

        run_anomaly_scan(&mut conn, &clock, 72, 2.5, "system").unwrap();
        let second = run_anomaly_scan(&mut conn, &clock, 72, 2.5, "system").unwrap();
        assert_eq!(second.created_anomalies, 0);
        assert_eq!(list_anomalies(&conn, 10).unwrap().len(), 1);
    }

    #[test]
    fn stable_series_produces_no_anomalies() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        let values: Vec<f64> = (0..15).map(|i| 60.0 + f64::from(i % 2) * 0.1).collect();
        seed_readings(&mut conn, &clock, &values);

        let summary = run_anomaly_scan(&mut conn, &clock, 72, 2.5, "system").unwrap();
        assert_eq!(summary.created_anomalies, 0);
    }
}
