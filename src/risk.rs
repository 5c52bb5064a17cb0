//! Explainable logistic risk baselines for suppliers and batches. The
//! weights, intercepts, and band cutoffs are deliberate literal constants of
//! the calibrated baseline models, not configuration.

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::append_audit_event;
use crate::batch::find_batch;
use crate::clock::Clock;
use crate::error::{Error, Result};

const SUPPLIER_WEIGHTS: [(&str, f64); 5] = [
    ("delay_rate_90d", 1.8),
    ("quality_fail_rate_180d", 2.2),
    ("rejection_rate", 1.5),
    ("volume_cv", 1.1),
    ("critical_nonconformities_12m", 0.35),
];
const SUPPLIER_INTERCEPT: f64 = -2.0;

const BATCH_WEIGHTS: [(&str, f64); 5] = [
    ("supplier_risk_norm", 1.6),
    ("storage_days_norm", 0.9),
    ("open_alerts_norm", 1.4),
    ("historical_deviation_rate", 1.3),
    ("current_fail_count_norm", 2.0),
];
const BATCH_INTERCEPT: f64 = -2.2;

/// Per-metric (low, high) band cutoffs for supplier feature triage.
const SUPPLIER_METRIC_BANDS: [(&str, f64, f64); 5] = [
    ("delay_rate_90d", 0.05, 0.15),
    ("quality_fail_rate_180d", 0.05, 0.15),
    ("rejection_rate", 0.03, 0.10),
    ("volume_cv", 0.15, 0.35),
    ("critical_nonconformities_12m", 1.0, 3.0),
];
const DEFAULT_METRIC_BANDS: (f64, f64) = (0.33, 0.66);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatrixZone {
    Low,
    Medium,
    High,
    Critical,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

pub fn risk_band(score: f64) -> RiskBand {
    if score >= 66.0 {
        RiskBand::High
    } else if score >= 33.0 {
        RiskBand::Medium
    } else {
        RiskBand::Low
    }
}

/// Band for one supplier metric, against that metric's own cutoffs.
pub fn supplier_metric_band(metric: &str, value: f64) -> RiskBand {
    let (low, high) = SUPPLIER_METRIC_BANDS
        .iter()
        .find(|(name, _, _)| *name == metric)
        .map(|(_, low, high)| (*low, *high))
        .unwrap_or(DEFAULT_METRIC_BANDS);
    if value >= high {
        RiskBand::High
    } else if value >= low {
        RiskBand::Medium
    } else {
        RiskBand::Low
    }
}

/// Probability x score placement on the escalation matrix.
pub fn matrix_zone(probability: f64, score: f64) -> MatrixZone {
    if probability >= 0.7 && score >= 66.0 {
        MatrixZone::Critical
    } else if probability >= 0.5 && score >= 33.0 {
        MatrixZone::High
    } else if probability >= 0.35 {
        MatrixZone::Medium
    } else {
        MatrixZone::Low
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskExplanation {
    pub method: String,
    pub intercept: f64,
    pub feature_contributions: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub risk_score: f64,
    pub risk_band: RiskBand,
    pub risk_probability: f64,
    pub explanation: RiskExplanation,
}

fn logistic_score(
    method: &str,
    intercept: f64,
    weights: &[(&str, f64)],
    features: &BTreeMap<String, f64>,
) -> RiskScore {
    let mut z = intercept;
    let mut contributions = BTreeMap::new();
    for (name, weight) in weights {
        let value = features.get(*name).copied().unwrap_or(0.0);
        let contribution = weight * value;
        z += contribution;
        contributions.insert((*name).to_string(), round4(contribution));
    }

    let probability = sigmoid(z);
    let score = round2(probability * 100.0);
    RiskScore {
        risk_score: score,
        risk_band: risk_band(score),
        risk_probability: round4(probability),
        explanation: RiskExplanation {
            method: method.to_string(),
            intercept,
            feature_contributions: contributions,
        },
    }
}

pub fn supplier_risk_score(features: &BTreeMap<String, f64>) -> RiskScore {
    logistic_score(
        "logistic_baseline",
        SUPPLIER_INTERCEPT,
        &SUPPLIER_WEIGHTS,
        features,
    )
}

pub fn batch_risk_score(features: &BTreeMap<String, f64>) -> RiskScore {
    logistic_score(
        "logistic_batch_baseline",
        BATCH_INTERCEPT,
        &BATCH_WEIGHTS,
        features,
    )
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Loads normalized batch features from the store. Supplier risk comes from
/// the most recent persisted supplier scores (or a neutral default when none
/// exist yet); the logistics feed supplying richer supplier features is an
/// external collaborator.
pub fn load_batch_features(
    conn: &Connection,
    clock: &dyn Clock,
    batch_code: &str,
) -> Result<Option<BTreeMap<String, f64>>> {
    let Some((batch_id, product_sku)) = find_batch(conn, batch_code)? else {
        return Ok(None);
    };
    let now = clock.now();
    let as_of = clock.today();

    let storage_days: f64 = conn.query_row(
        "SELECT MAX(julianday(?2) - julianday(produced_at), 0.0)
         FROM production_batches WHERE batch_id = ?1",
        rusqlite::params![batch_id, now],
        |row| row.get(0),
    )?;

    let supplier_risk: f64 = conn
        .query_row(
            "
            SELECT AVG(score) FROM (
              SELECT score, ROW_NUMBER() OVER (
                PARTITION BY entity_id ORDER BY scored_at DESC
              ) AS rn
              FROM ai_risk_scores
              WHERE entity_type = 'supplier'
            )
            WHERE rn = 1
            ",
            [],
            |row| row.get::<_, Option<f64>>(0),
        )?
        .unwrap_or(45.0);

    let open_alerts: f64 = conn.query_row(
        "SELECT COUNT(*) FROM alerts WHERE batch_id = ?1 AND status = 'open'",
        [&batch_id],
        |row| row.get(0),
    )?;

    let fail_count: f64 = conn.query_row(
        "
        SELECT COUNT(*)
        FROM quality_test_records q
        JOIN production_batches b ON b.batch_id = q.batch_id
        JOIN compliance_thresholds t
          ON t.parameter_code = q.parameter_code
         AND t.product_category = b.product_sku
         AND t.effective_from <= COALESCE(date(q.tested_at), ?2)
         AND (t.effective_to IS NULL OR t.effective_to >= COALESCE(date(q.tested_at), ?2))
        WHERE q.batch_id = ?1
          AND ((t.limit_max IS NOT NULL AND q.observed_value > CAST(t.limit_max AS REAL))
            OR (t.limit_min IS NOT NULL AND q.observed_value < CAST(t.limit_min AS REAL)))
        ",
        rusqlite::params![batch_id, as_of],
        |row| row.get(0),
    )?;

    let historical_deviation: f64 = conn
        .query_row(
            "
            SELECT AVG(fail_flag) FROM (
              SELECT pb.batch_id,
                     MAX(CASE WHEN ((t.limit_max IS NOT NULL AND q.observed_value > CAST(t.limit_max AS REAL))
                               OR (t.limit_min IS NOT NULL AND q.observed_value < CAST(t.limit_min AS REAL)))
                              THEN 1 ELSE 0 END) AS fail_flag
              FROM production_batches pb
              LEFT JOIN quality_test_records q ON q.batch_id = pb.batch_id
              LEFT JOIN compliance_thresholds t
                     ON t.parameter_code = q.parameter_code
                    AND t.product_category = pb.product_sku
                    AND t.effective_from <= COALESCE(date(q.tested_at), ?3)
                    AND (t.effective_to IS NULL OR t.effective_to >= COALESCE(date(q.tested_at), ?3))
              WHERE pb.product_sku = ?1
                AND pb.batch_code <> ?2
              GROUP BY pb.batch_id
            )
            ",
            rusqlite::params![product_sku, batch_code, as_of],
            |row| row.get::<_, Option<f64>>(0),
        )?
        .unwrap_or(0.0);

    let mut features = BTreeMap::new();
    features.insert(
        "supplier_risk_norm".to_string(),
        clamp01(supplier_risk / 100.0),
    );
    features.insert(
        "storage_days_norm".to_string(),
        (storage_days / 180.0).min(1.0),
    );
    features.insert("open_alerts_norm".to_string(), (open_alerts / 10.0).min(1.0));
    features.insert(
        "historical_deviation_rate".to_string(),
        clamp01(historical_deviation),
    );
    features.insert(
        "current_fail_count_norm".to_string(),
        (fail_count / 5.0).min(1.0),
    );
    Ok(Some(features))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRiskOutcome {
    pub batch_code: String,
    pub features: BTreeMap<String, f64>,
    pub risk: RiskScore,
}

/// Scores a batch, persists the score row, and audit-logs the scoring.
pub fn score_batch_and_store(
    conn: &mut Connection,
    clock: &dyn Clock,
    batch_code: &str,
    actor_id: &str,
) -> Result<BatchRiskOutcome> {
    let features = load_batch_features(conn, clock, batch_code)?
        .ok_or_else(|| Error::not_found(format!("Batch not found: {batch_code}")))?;
    let (batch_id, _) = find_batch(conn, batch_code)?
        .ok_or_else(|| Error::not_found(format!("Batch not found: {batch_code}")))?;
    let risk = batch_risk_score(&features);

    persist_score(
        conn,
        clock,
        actor_id,
        "batch",
        &batch_id,
        "batch_risk_logistic_baseline",
        &risk,
        &features,
        serde_json::json!({
            "batch_code": batch_code,
            "risk_score": risk.risk_score,
            "risk_band": risk.risk_band,
            "features": features,
        }),
        "BATCH_RISK_SCORED",
    )?;

    Ok(BatchRiskOutcome {
        batch_code: batch_code.to_string(),
        features,
        risk,
    })
}

/// Persists a supplier score computed from collaborator-supplied features.
pub fn score_supplier_and_store(
    conn: &mut Connection,
    clock: &dyn Clock,
    supplier_id: &str,
    features: &BTreeMap<String, f64>,
    actor_id: &str,
) -> Result<RiskScore> {
    if supplier_id.trim().is_empty() {
        return Err(Error::validation("supplier_id is required"));
    }
    let risk = supplier_risk_score(features);
    persist_score(
        conn,
        clock,
        actor_id,
        "supplier",
        supplier_id,
        "supplier_risk_logistic_baseline",
        &risk,
        features,
        serde_json::json!({
            "supplier_id": supplier_id,
            "risk_score": risk.risk_score,
            "risk_band": risk.risk_band,
            "features": features,
        }),
        "SUPPLIER_RISK_SCORED",
    )?;
    Ok(risk)
}

#[allow(clippy::too_many_arguments)]
fn persist_score(
    conn: &mut Connection,
    clock: &dyn Clock,
    actor_id: &str,
    entity_type: &str,
    entity_id: &str,
    model_name: &str,
    risk: &RiskScore,
    features: &BTreeMap<String, f64>,
    audit_payload: serde_json::Value,
    audit_action: &str,
) -> Result<()> {
    let explanation = serde_json::json!({
        "method": risk.explanation.method,
        "intercept": risk.explanation.intercept,
        "feature_contributions": risk.explanation.feature_contributions,
        "features": features,
    });

    let tx = conn.transaction()?;
    tx.execute(
        "
        INSERT INTO ai_risk_scores (
          risk_id, entity_type, entity_id, model_name, model_version,
          score, risk_band, explanation, scored_at
        ) VALUES (?1, ?2, ?3, ?4, 'v1', ?5, ?6, ?7, ?8)
        ",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            entity_type,
            entity_id,
            model_name,
            risk.risk_score,
            risk.risk_band.as_str(),
            explanation.to_string(),
            clock.now(),
        ],
    )?;
    append_audit_event(
        &tx,
        clock,
        actor_id,
        audit_action,
        entity_type,
        entity_id,
        audit_payload,
    )?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::batch::create_batch;
    use crate::clock::FixedClock;
    use crate::store::open_in_memory;

    fn features(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), *value))
            .collect()
    }

    #[test]
    fn supplier_score_stays_in_band_range() {
        let result = supplier_risk_score(&features(&[
            ("delay_rate_90d", 0.5),
            ("quality_fail_rate_180d", 0.3),
            ("rejection_rate", 0.2),
            ("volume_cv", 0.6),
            ("critical_nonconformities_12m", 3.0),
        ]));
        assert!(result.risk_score >= 0.0 && result.risk_score <= 100.0);
        assert!(matches!(result.risk_band, RiskBand::Medium | RiskBand::High));
        assert_eq!(result.explanation.feature_contributions.len(), 5);
        assert_eq!(
            result.explanation.feature_contributions["quality_fail_rate_180d"],
            0.66
        );
    }

    #[test]
    fn batch_score_reports_band_and_probability() {
        let result = batch_risk_score(&features(&[
            ("supplier_risk_norm", 0.8),
            ("storage_days_norm", 0.2),
            ("open_alerts_norm", 0.4),
            ("historical_deviation_rate", 0.3),
            ("current_fail_count_norm", 0.2),
        ]));
        assert!(result.risk_score >= 0.0 && result.risk_score <= 100.0);
        assert!(result.risk_probability > 0.0 && result.risk_probability < 1.0);
    }

    #[test]
    fn supplier_metric_bands_use_per_metric_cutoffs() {
        assert_eq!(supplier_metric_band("delay_rate_90d", 0.02), RiskBand::Low);
        assert_eq!(
            supplier_metric_band("delay_rate_90d", 0.09),
            RiskBand::Medium
        );
        assert_eq!(supplier_metric_band("delay_rate_90d", 0.2), RiskBand::High);
        assert_eq!(supplier_metric_band("volume_cv", 0.1), RiskBand::Low);
        assert_eq!(supplier_metric_band("volume_cv", 0.25), RiskBand::Medium);
        assert_eq!(supplier_metric_band("volume_cv", 0.5), RiskBand::High);
    }

    #[test]
    fn matrix_zone_classification() {
        assert_eq!(matrix_zone(0.8, 70.0), MatrixZone::Critical);
        assert_eq!(matrix_zone(0.55, 60.0), MatrixZone::High);
        assert_eq!(matrix_zone(0.4, 20.0), MatrixZone::Medium);
        assert_eq!(matrix_zone(0.2, 20.0), MatrixZone::Low);
    }

    #[test]
    fn score_batch_and_store_persists_and_audits() {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 3, 5, 9, 0, 0).unwrap());
        let mut conn = open_in_memory(&clock).unwrap();
        create_batch(&mut conn, &clock, "op", "BATCH-1", "SKU-1", None).unwrap();

        let outcome = score_batch_and_store(&mut conn, &clock, "BATCH-1", "system").unwrap();
        assert_eq!(outcome.batch_code, "BATCH-1");
        // Neutral defaults: only supplier_risk_norm (0.45) contributes.
        assert_eq!(outcome.features["supplier_risk_norm"], 0.45);
        assert_eq!(outcome.features["current_fail_count_norm"], 0.0);

        let stored: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM ai_risk_scores WHERE entity_type = 'batch'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, 1);

        let err = score_batch_and_store(&mut conn, &clock, "MISSING", "system").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn score_supplier_and_store_uses_latest_scores_for_batches() {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 3, 5, 9, 0, 0).unwrap());
        let mut conn = open_in_memory(&clock).unwrap();
        create_batch(&mut conn, &clock, "op", "BATCH-1", "SKU-1", None).unwrap();

        score_supplier_and_store(
            &mut conn,
            &clock,
            "supplier-9",
            &features(&[("delay_rate_90d", 0.9), ("quality_fail_rate_180d", 0.9)]),
            "system",
        )
        .unwrap();

        let loaded = load_batch_features(&conn, &clock, "BATCH-1").unwrap().unwrap();
        assert!(loaded["supplier_risk_norm"] > 0.45);
    }
}
