//! Multi-standard compliance evaluation of a batch's quality observations
//! against the live effective-dated thresholds. Pure computation over
//! already-joined rows; safe to call repeatedly.

use std::collections::BTreeMap;

use rusqlite::Connection;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::batch::require_batch;
use crate::clock::Clock;
use crate::error::Result;
use crate::model::{CheckStatus, ComparisonResult, RiskFlag, StandardName};
use crate::regulatory::decimal_from_store;

/// Observations within this fraction of a bound are flagged WARNING.
const NEAR_MARGIN: f64 = 0.10;

fn dec_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

/// Evaluates one observation against one standard's bounds. Range violations
/// are checked min-then-max and win outright; otherwise the near-limit
/// margins apply, with the lower-limit check evaluated second so it can
/// override an upper-limit warning when both bounds are close.
pub fn evaluate_status(
    observed: f64,
    limit_min: Option<Decimal>,
    limit_max: Option<Decimal>,
) -> (CheckStatus, RiskFlag) {
    if let Some(min) = limit_min {
        if observed < dec_f64(min) {
            return (CheckStatus::Fail, RiskFlag::OutOfRange);
        }
    }
    if let Some(max) = limit_max {
        if observed > dec_f64(max) {
            return (CheckStatus::Fail, RiskFlag::OutOfRange);
        }
    }

    let mut risk_flag = RiskFlag::Normal;
    if let Some(max) = limit_max {
        if observed >= dec_f64(max) * (1.0 - NEAR_MARGIN) {
            risk_flag = RiskFlag::NearUpperLimit;
        }
    }
    if let Some(min) = limit_min {
        if observed <= dec_f64(min) * (1.0 + NEAR_MARGIN) {
            risk_flag = RiskFlag::NearLowerLimit;
        }
    }

    if risk_flag == RiskFlag::Normal {
        (CheckStatus::Pass, risk_flag)
    } else {
        (CheckStatus::Warning, risk_flag)
    }
}

/// Human display string for a bound pair, e.g. `<= 2 ug/kg`.
pub fn format_limit(
    limit_min: Option<Decimal>,
    limit_max: Option<Decimal>,
    unit: &str,
) -> Option<String> {
    match (limit_min, limit_max) {
        (None, None) => None,
        (Some(min), Some(max)) => Some(format!(
            "{} to {} {unit}",
            min.normalize(),
            max.normalize()
        )),
        (None, Some(max)) => Some(format!("<= {} {unit}", max.normalize())),
        (Some(min), None) => Some(format!(">= {} {unit}", min.normalize())),
    }
}

#[derive(Debug, Clone)]
struct LimitEntry {
    limit_min: Option<Decimal>,
    limit_max: Option<Decimal>,
    unit: String,
}

struct ComparisonGroup {
    parameter: String,
    observed: f64,
    unit: String,
    standards: BTreeMap<StandardName, LimitEntry>,
}

/// Roll-up order; the first FAIL short-circuits the remaining standards.
const ROLLUP_ORDER: [StandardName; 4] = [
    StandardName::Fssai,
    StandardName::Eu,
    StandardName::Codex,
    StandardName::HaccpInternal,
];

/// Evaluates every quality observation of a batch against the threshold rows
/// active for the observation's test date (or today when untimed), grouped
/// per (parameter, observed value, unit).
pub fn batch_comparison(
    conn: &Connection,
    clock: &dyn Clock,
    batch_code: &str,
) -> Result<Vec<ComparisonResult>> {
    require_batch(conn, batch_code)?;
    let as_of = clock.today();

    let mut statement = conn.prepare(
        "
        SELECT q.parameter_name, q.observed_value, q.unit,
               t.standard_name, t.limit_min, t.limit_max, t.unit AS limit_unit
        FROM quality_test_records q
        JOIN production_batches b ON b.batch_id = q.batch_id
        LEFT JOIN compliance_thresholds t
          ON t.parameter_code = q.parameter_code
         AND t.product_category = b.product_sku
         AND t.effective_from <= COALESCE(date(q.tested_at), ?2)
         AND (t.effective_to IS NULL OR t.effective_to >= COALESCE(date(q.tested_at), ?2))
        WHERE b.batch_code = ?1
        ORDER BY q.parameter_name
        ",
    )?;

    let mut groups: Vec<ComparisonGroup> = Vec::new();
    let mut rows = statement.query(rusqlite::params![batch_code, as_of])?;
    while let Some(row) = rows.next()? {
        let parameter: String = row.get(0)?;
        let observed: f64 = row.get(1)?;
        let unit: String = row.get(2)?;
        let standard: Option<String> = row.get(3)?;

        let position = groups.iter().position(|group| {
            group.parameter == parameter
                && group.observed.to_bits() == observed.to_bits()
                && group.unit == unit
        });
        let index = match position {
            Some(index) => index,
            None => {
                groups.push(ComparisonGroup {
                    parameter,
                    observed,
                    unit,
                    standards: BTreeMap::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];

        if let Some(standard) = standard {
            let standard = StandardName::parse(&standard)?;
            let limit_unit: Option<String> = row.get(6)?;
            group.standards.insert(
                standard,
                LimitEntry {
                    limit_min: decimal_from_store(row.get(4)?)?,
                    limit_max: decimal_from_store(row.get(5)?)?,
                    unit: limit_unit.unwrap_or_else(|| group.unit.clone()),
                },
            );
        }
    }

    let mut output = Vec::with_capacity(groups.len());
    for group in groups {
        let mut status = CheckStatus::Pass;
        let mut risk_flag = RiskFlag::Normal;
        for standard in ROLLUP_ORDER {
            let Some(entry) = group.standards.get(&standard) else {
                continue;
            };
            let (standard_status, standard_risk) =
                evaluate_status(group.observed, entry.limit_min, entry.limit_max);
            if standard_status == CheckStatus::Fail {
                status = CheckStatus::Fail;
                risk_flag = standard_risk;
                break;
            }
            if standard_status == CheckStatus::Warning && status != CheckStatus::Fail {
                status = CheckStatus::Warning;
                risk_flag = standard_risk;
            }
        }

        let limit_for = |standard: StandardName| {
            group
                .standards
                .get(&standard)
                .and_then(|entry| format_limit(entry.limit_min, entry.limit_max, &entry.unit))
        };
        let fssai_limit = limit_for(StandardName::Fssai);
        let eu_limit = limit_for(StandardName::Eu);
        let codex_limit = limit_for(StandardName::Codex);
        let haccp_limit = limit_for(StandardName::HaccpInternal);

        output.push(ComparisonResult {
            fssai_limit,
            eu_limit,
            codex_limit,
            haccp_limit,
            parameter: group.parameter,
            batch_value: group.observed,
            unit: group.unit,
            status,
            risk_flag,
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rusqlite::Connection;

    use super::*;
    use crate::batch::{create_batch, record_quality_test};
    use crate::clock::FixedClock;
    use crate::error::Error;
    use crate::regulatory::{
        approve_threshold_release, import_threshold_release, publish_threshold_release,
        ImportReleaseArgs,
    };
    use crate::requirements::{upsert_parameter_requirement, RequirementUpsert};
    use crate::store::open_in_memory;

    fn dec(raw: &str) -> Decimal {
        raw.parse().unwrap()
    }

    #[test]
    fn evaluate_status_boundaries() {
        assert_eq!(
            evaluate_status(8.4, None, Some(dec("8.5"))),
            (CheckStatus::Warning, RiskFlag::NearUpperLimit)
        );
        assert_eq!(
            evaluate_status(9.0, None, Some(dec("8.5"))),
            (CheckStatus::Fail, RiskFlag::OutOfRange)
        );
        assert_eq!(
            evaluate_status(1.0, Some(dec("2")), None),
            (CheckStatus::Fail, RiskFlag::OutOfRange)
        );
        assert_eq!(
            evaluate_status(5.0, None, None),
            (CheckStatus::Pass, RiskFlag::Normal)
        );
        assert_eq!(
            evaluate_status(5.0, Some(dec("1")), Some(dec("10"))),
            (CheckStatus::Pass, RiskFlag::Normal)
        );
    }

    #[test]
    fn lower_limit_warning_overrides_upper_when_both_apply() {
        // Bounds tight enough that both margins cover the observation.
        assert_eq!(
            evaluate_status(10.0, Some(dec("9.5")), Some(dec("10.5"))),
            (CheckStatus::Warning, RiskFlag::NearLowerLimit)
        );
    }

    #[test]
    fn format_limit_renders_bound_shapes() {
        assert_eq!(
            format_limit(None, Some(dec("2.0")), "ug/kg"),
            Some("<= 2 ug/kg".to_string())
        );
        assert_eq!(
            format_limit(Some(dec("0.5")), None, "%"),
            Some(">= 0.5 %".to_string())
        );
        assert_eq!(
            format_limit(Some(dec("1")), Some(dec("4")), "mg/kg"),
            Some("1 to 4 mg/kg".to_string())
        );
        assert_eq!(format_limit(None, None, "%"), None);
    }

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap())
    }

    fn publish_afla_limit(conn: &mut Connection, clock: &FixedClock) {
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

        let csv = b"product_category,parameter_name,parameter_code,unit,limit_max,severity,source_clause\n\
                    TRAD-NUTRI-500G,Aflatoxin B1,AFLA_B1,ppb,2,critical,Clause 4.2\n";
        let args = ImportReleaseArgs {
            standard_name: "FSSAI".to_string(),
            release_code: "FSSAI-2026-01".to_string(),
            document_title: "FSSAI contaminant limits".to_string(),
            effective_from: "2026-02-01".to_string(),
            imported_by: "qa-lead".to_string(),
            jurisdiction: None,
            source_authority: "FSSAI".to_string(),
            document_url: None,
            publication_date: "2026-01-15".to_string(),
            effective_to: None,
            notes: None,
        };
        let summary = import_threshold_release(conn, clock, &args, csv).unwrap();
        approve_threshold_release(conn, clock, &summary.release_id, "qa-head", None).unwrap();
        publish_threshold_release(conn, clock, &summary.release_id, "qa-head").unwrap();
    }

    #[test]
    fn end_to_end_published_threshold_fails_exceeding_batch() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        publish_afla_limit(&mut conn, &clock);

        create_batch(&mut conn, &clock, "op", "BATCH-7", "TRAD-NUTRI-500G", None).unwrap();
        record_quality_test(
            &mut conn,
            &clock,
            "op",
            "BATCH-7",
            "Aflatoxin B1",
            2.5,
            "ug/kg",
            None,
        )
        .unwrap();

        let results = batch_comparison(&conn, &clock, "BATCH-7").unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.parameter, "Aflatoxin B1");
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.risk_flag, RiskFlag::OutOfRange);
        assert_eq!(result.fssai_limit.as_deref(), Some("<= 2 ug/kg"));
        assert!(result.eu_limit.is_none());
    }

    #[test]
    fn observation_without_thresholds_passes_as_normal() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        create_batch(&mut conn, &clock, "op", "BATCH-8", "SKU-NONE", None).unwrap();
        record_quality_test(&mut conn, &clock, "op", "BATCH-8", "Moisture", 8.0, "%", None)
            .unwrap();

        let results = batch_comparison(&conn, &clock, "BATCH-8").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, CheckStatus::Pass);
        assert_eq!(results[0].risk_flag, RiskFlag::Normal);
        assert!(results[0].fssai_limit.is_none());
    }

    #[test]
    fn unknown_batch_code_is_not_found() {
        let clock = clock();
        let conn = open_in_memory(&clock).unwrap();
        let err = batch_comparison(&conn, &clock, "MISSING").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
