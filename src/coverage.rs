//! Coverage evaluation: are all mandatory (standard, parameter, unit)
//! combinations satisfied, either by a candidate release or by the live
//! threshold table? Approval and publish are gated on the release form of
//! this check; the active form feeds operator dashboards.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::error::Result;
use crate::model::{
    ActiveCoverageReport, ActiveCoverageSummary, CategoryCoverage, MissingRequirement,
    ReleaseCoverageReport, RequirementCoverageRow, RowRef, StandardCoverage, UnitMismatch,
    ALL_STANDARDS,
};
use crate::regulatory::require_release;
use crate::requirements::active_parameter_requirements;
use crate::units::normalize_unit;

#[derive(Debug, Clone)]
struct ReleaseValueRow {
    product_category: String,
    parameter_code: String,
    parameter_name: String,
    unit: String,
    source_clause: String,
}

fn load_release_rows(conn: &Connection, release_id: &str) -> Result<Vec<ReleaseValueRow>> {
    let mut statement = conn.prepare(
        "
        SELECT product_category, parameter_code, parameter_name, unit, source_clause
        FROM regulatory_threshold_values
        WHERE release_id = ?1
        ORDER BY product_category, parameter_code
        ",
    )?;
    let rows = statement
        .query_map([release_id], |row| {
            Ok(ReleaseValueRow {
                product_category: row.get(0)?,
                parameter_code: row.get(1)?,
                parameter_name: row.get(2)?,
                unit: row.get(3)?,
                source_clause: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Coverage of one release against the requirement profile active at its
/// effective_from. `ready_for_approval`/`ready_for_publish` are both true
/// only when nothing mandatory is missing, no unit mismatches exist, and
/// every row carries a source clause.
pub fn release_coverage_report(
    conn: &Connection,
    release_id: &str,
) -> Result<ReleaseCoverageReport> {
    let release = require_release(conn, release_id)?;
    let release_rows = load_release_rows(conn, release_id)?;

    if release_rows.is_empty() {
        return Ok(ReleaseCoverageReport {
            release_id: release.release_id,
            standard_name: release.standard_name,
            release_code: release.release_code,
            effective_from: release.effective_from,
            effective_to: release.effective_to,
            requirement_rows: 0,
            release_rows: 0,
            ready_for_approval: false,
            ready_for_publish: false,
            missing_required: Vec::new(),
            unit_mismatches: Vec::new(),
            missing_source_clause: Vec::new(),
            extra_rows: Vec::new(),
            product_category_summary: BTreeMap::new(),
            diagnostics: vec!["Release has no threshold rows".to_string()],
        });
    }

    let requirements = active_parameter_requirements(conn, release.effective_from, None)?;
    let required: Vec<_> = requirements
        .iter()
        .filter(|requirement| requirement.requires_standard(release.standard_name))
        .collect();

    let release_index: BTreeMap<(String, String), &ReleaseValueRow> = release_rows
        .iter()
        .map(|row| {
            (
                (row.product_category.clone(), row.parameter_code.clone()),
                row,
            )
        })
        .collect();

    let mut missing_required = Vec::new();
    let mut unit_mismatches = Vec::new();
    for requirement in &required {
        let key = (
            requirement.product_category.clone(),
            requirement.parameter_code.clone(),
        );
        let Some(row) = release_index.get(&key) else {
            missing_required.push(MissingRequirement {
                product_category: requirement.product_category.clone(),
                parameter_code: requirement.parameter_code.clone(),
                parameter_name: requirement.parameter_name.clone(),
                canonical_unit: requirement.canonical_unit.clone(),
            });
            continue;
        };
        if normalize_unit(&row.unit) != normalize_unit(&requirement.canonical_unit) {
            unit_mismatches.push(UnitMismatch {
                product_category: requirement.product_category.clone(),
                parameter_code: requirement.parameter_code.clone(),
                expected_unit: requirement.canonical_unit.clone(),
                release_unit: row.unit.clone(),
            });
        }
    }

    let missing_source_clause: Vec<RowRef> = release_rows
        .iter()
        .filter(|row| row.source_clause.trim().is_empty())
        .map(|row| RowRef {
            product_category: row.product_category.clone(),
            parameter_code: row.parameter_code.clone(),
            parameter_name: row.parameter_name.clone(),
        })
        .collect();

    // Extra rows are informational only and never gate approval or publish;
    // over-provisioning beyond the mandatory profile is allowed.
    let extra_rows: Vec<RowRef> = if required.is_empty() {
        Vec::new()
    } else {
        release_index
            .iter()
            .filter(|(key, _)| {
                !required.iter().any(|requirement| {
                    requirement.product_category == key.0 && requirement.parameter_code == key.1
                })
            })
            .map(|(_, row)| RowRef {
                product_category: row.product_category.clone(),
                parameter_code: row.parameter_code.clone(),
                parameter_name: row.parameter_name.clone(),
            })
            .collect()
    };

    let mut product_category_summary: BTreeMap<String, CategoryCoverage> = BTreeMap::new();
    for requirement in &required {
        let entry = product_category_summary
            .entry(requirement.product_category.clone())
            .or_default();
        entry.required += 1;
        let key = (
            requirement.product_category.clone(),
            requirement.parameter_code.clone(),
        );
        if release_index.contains_key(&key) {
            entry.present += 1;
        } else {
            entry.missing += 1;
        }
    }

    let ready = missing_required.is_empty()
        && unit_mismatches.is_empty()
        && missing_source_clause.is_empty();

    Ok(ReleaseCoverageReport {
        release_id: release.release_id,
        standard_name: release.standard_name,
        release_code: release.release_code,
        effective_from: release.effective_from,
        effective_to: release.effective_to,
        requirement_rows: required.len(),
        release_rows: release_rows.len(),
        ready_for_approval: ready,
        ready_for_publish: ready,
        missing_required,
        unit_mismatches,
        missing_source_clause,
        extra_rows,
        product_category_summary,
        diagnostics: Vec::new(),
    })
}

/// Coverage of the live threshold table against the requirement profile as
/// of a date. A requirement row is fully covered only when every standard it
/// marks mandatory is both present and unit-matched, each standard checked
/// independently.
pub fn active_coverage_report(
    conn: &Connection,
    as_of: NaiveDate,
    product_category: Option<&str>,
) -> Result<ActiveCoverageReport> {
    let requirements = active_parameter_requirements(conn, as_of, product_category)?;
    if requirements.is_empty() {
        return Ok(ActiveCoverageReport {
            as_of,
            rows: Vec::new(),
            summary: ActiveCoverageSummary {
                requirement_rows: 0,
                fully_covered_rows: 0,
                coverage_pct: 0.0,
            },
        });
    }

    let mut statement = conn.prepare(
        "
        SELECT product_category, parameter_code, standard_name, unit
        FROM compliance_thresholds
        WHERE effective_from <= ?1
          AND (effective_to IS NULL OR effective_to >= ?1)
        ",
    )?;
    let mut threshold_index: HashMap<(String, String, String), String> = HashMap::new();
    let mut rows = statement.query([as_of])?;
    while let Some(row) = rows.next()? {
        let product: String = row.get(0)?;
        let code: String = row.get(1)?;
        let standard: String = row.get(2)?;
        let unit: String = row.get(3)?;
        threshold_index.insert((product, code, standard), normalize_unit(&unit));
    }

    let mut row_results = Vec::with_capacity(requirements.len());
    let mut fully_covered = 0_usize;
    for requirement in &requirements {
        let canonical = normalize_unit(&requirement.canonical_unit);
        let mut standards = BTreeMap::new();
        let mut all_required_present = true;

        for standard in ALL_STANDARDS {
            let required = requirement.requires_standard(standard);
            let key = (
                requirement.product_category.clone(),
                requirement.parameter_code.clone(),
                standard.as_str().to_string(),
            );
            let observed_unit = threshold_index.get(&key).cloned();
            let present = !required || observed_unit.is_some();
            let unit_ok = !required || observed_unit.as_deref() == Some(canonical.as_str());
            if required && (!present || !unit_ok) {
                all_required_present = false;
            }
            standards.insert(
                standard.as_str().to_string(),
                StandardCoverage {
                    required,
                    present,
                    unit_ok,
                    observed_unit,
                },
            );
        }

        if all_required_present {
            fully_covered += 1;
        }
        row_results.push(RequirementCoverageRow {
            product_category: requirement.product_category.clone(),
            parameter_code: requirement.parameter_code.clone(),
            parameter_name: requirement.parameter_name.clone(),
            canonical_unit: requirement.canonical_unit.clone(),
            standards,
            fully_covered: all_required_present,
        });
    }

    let coverage_pct =
        ((fully_covered as f64 / row_results.len() as f64) * 100.0 * 100.0).round() / 100.0;

    Ok(ActiveCoverageReport {
        as_of,
        rows: row_results,
        summary: ActiveCoverageSummary {
            requirement_rows: requirements.len(),
            fully_covered_rows: fully_covered,
            coverage_pct,
        },
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clock::FixedClock;
    use crate::requirements::{upsert_parameter_requirement, RequirementUpsert};
    use crate::store::open_in_memory;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap())
    }

    fn requirement(code: &str, unit: &str) -> RequirementUpsert {
        RequirementUpsert {
            product_category: "TRAD-NUTRI-500G".to_string(),
            parameter_code: code.to_string(),
            parameter_name: code.to_string(),
            canonical_unit: unit.to_string(),
            require_fssai: true,
            require_eu: false,
            require_codex: false,
            require_haccp_internal: false,
            is_mandatory: true,
            effective_from: "2026-01-01".parse().unwrap(),
            effective_to: None,
            source_note: None,
        }
    }

    #[test]
    fn active_coverage_reports_missing_and_unit_mismatch_per_standard() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        upsert_parameter_requirement(&mut conn, &clock, "admin", &requirement("AFLA_B1", "ug/kg"))
            .unwrap();
        upsert_parameter_requirement(&mut conn, &clock, "admin", &requirement("TPC", "cfu/g"))
            .unwrap();

        conn.execute(
            "
            INSERT INTO compliance_thresholds (
              threshold_id, parameter_code, standard_name, product_category,
              limit_min, limit_max, unit, severity, effective_from, effective_to, source_ref
            ) VALUES ('t1', 'AFLA_B1', 'FSSAI', 'TRAD-NUTRI-500G',
                      NULL, '2', 'ug/kg', 'critical', '2026-01-01', NULL, 'REL-1:4.2')
            ",
            [],
        )
        .unwrap();

        let report =
            active_coverage_report(&conn, "2026-02-01".parse().unwrap(), None).unwrap();
        assert_eq!(report.summary.requirement_rows, 2);
        assert_eq!(report.summary.fully_covered_rows, 1);
        assert_eq!(report.summary.coverage_pct, 50.0);

        let afla = report
            .rows
            .iter()
            .find(|row| row.parameter_code == "AFLA_B1")
            .unwrap();
        assert!(afla.fully_covered);
        let fssai = &afla.standards["FSSAI"];
        assert!(fssai.required && fssai.present && fssai.unit_ok);
        // EU is not mandatory for this row, so absence does not break coverage.
        let eu = &afla.standards["EU"];
        assert!(!eu.required && eu.present && eu.unit_ok);

        let tpc = report
            .rows
            .iter()
            .find(|row| row.parameter_code == "TPC")
            .unwrap();
        assert!(!tpc.fully_covered);
        assert!(!tpc.standards["FSSAI"].present);
    }

    #[test]
    fn active_coverage_with_no_requirements_is_empty() {
        let clock = clock();
        let conn = open_in_memory(&clock).unwrap();
        let report =
            active_coverage_report(&conn, "2026-02-01".parse().unwrap(), None).unwrap();
        assert!(report.rows.is_empty());
        assert_eq!(report.summary.coverage_pct, 0.0);
    }
}
