//! Governance requirement profile: which (product_category, parameter_code)
//! pairs each standard must cover, with canonical units and effective-date
//! windows. Coverage evaluation reads this; it never constrains observed
//! values itself.

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::ParameterRequirement;
use crate::params::normalize_parameter_code;
use crate::units::normalize_unit;

/// Input for creating or replacing one requirement row. Identity is
/// (product_category, parameter_code, effective_from).
#[derive(Debug, Clone)]
pub struct RequirementUpsert {
    pub product_category: String,
    pub parameter_code: String,
    pub parameter_name: String,
    pub canonical_unit: String,
    pub require_fssai: bool,
    pub require_eu: bool,
    pub require_codex: bool,
    pub require_haccp_internal: bool,
    pub is_mandatory: bool,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub source_note: Option<String>,
}

pub fn upsert_parameter_requirement(
    conn: &mut Connection,
    clock: &dyn Clock,
    actor_id: &str,
    upsert: &RequirementUpsert,
) -> Result<String> {
    let product_category = upsert.product_category.trim();
    if product_category.is_empty() {
        return Err(Error::validation("product_category is required"));
    }
    let parameter_name = upsert.parameter_name.trim();
    if parameter_name.is_empty() {
        return Err(Error::validation("parameter_name is required"));
    }
    let canonical_unit = normalize_unit(&upsert.canonical_unit);
    if canonical_unit.is_empty() {
        return Err(Error::validation("canonical_unit is required"));
    }
    if let Some(effective_to) = upsert.effective_to {
        if effective_to < upsert.effective_from {
            return Err(Error::validation(
                "effective_to cannot be earlier than effective_from",
            ));
        }
    }

    let parameter_code = if upsert.parameter_code.trim().is_empty() {
        normalize_parameter_code(parameter_name)
    } else {
        normalize_parameter_code(&upsert.parameter_code)
    };

    let tx = conn.transaction()?;
    let existing: Option<String> = tx
        .query_row(
            "
            SELECT requirement_id
            FROM regulatory_parameter_requirements
            WHERE product_category = ?1 AND parameter_code = ?2 AND effective_from = ?3
            ",
            rusqlite::params![product_category, parameter_code, upsert.effective_from],
            |row| row.get(0),
        )
        .optional()?;
    let requirement_id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());

    tx.execute(
        "
        INSERT INTO regulatory_parameter_requirements (
          requirement_id, product_category, parameter_code, parameter_name,
          canonical_unit, require_fssai, require_eu, require_codex,
          require_haccp_internal, is_mandatory, effective_from, effective_to, source_note
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(product_category, parameter_code, effective_from) DO UPDATE SET
          parameter_name = excluded.parameter_name,
          canonical_unit = excluded.canonical_unit,
          require_fssai = excluded.require_fssai,
          require_eu = excluded.require_eu,
          require_codex = excluded.require_codex,
          require_haccp_internal = excluded.require_haccp_internal,
          is_mandatory = excluded.is_mandatory,
          effective_to = excluded.effective_to,
          source_note = excluded.source_note
        ",
        rusqlite::params![
            requirement_id,
            product_category,
            parameter_code,
            parameter_name,
            canonical_unit,
            upsert.require_fssai,
            upsert.require_eu,
            upsert.require_codex,
            upsert.require_haccp_internal,
            upsert.is_mandatory,
            upsert.effective_from,
            upsert.effective_to,
            upsert.source_note,
        ],
    )?;

    crate::audit::append_audit_event(
        &tx,
        clock,
        actor_id,
        "REG_REQUIREMENT_UPSERTED",
        "parameter_requirement",
        &requirement_id,
        serde_json::json!({
            "product_category": product_category,
            "parameter_code": parameter_code,
            "canonical_unit": canonical_unit,
            "effective_from": upsert.effective_from.to_string(),
        }),
    )?;
    tx.commit()?;

    Ok(requirement_id)
}

/// Mandatory requirement rows whose window contains `as_of`, ordered by
/// (product_category, parameter_code).
pub fn active_parameter_requirements(
    conn: &Connection,
    as_of: NaiveDate,
    product_category: Option<&str>,
) -> Result<Vec<ParameterRequirement>> {
    let mut sql = String::from(
        "
        SELECT requirement_id, product_category, parameter_code, parameter_name,
               canonical_unit, require_fssai, require_eu, require_codex,
               require_haccp_internal, is_mandatory, effective_from, effective_to,
               source_note
        FROM regulatory_parameter_requirements
        WHERE is_mandatory = 1
          AND effective_from <= ?1
          AND (effective_to IS NULL OR effective_to >= ?1)
        ",
    );
    if product_category.is_some() {
        sql.push_str(" AND product_category = ?2");
    }
    sql.push_str(" ORDER BY product_category, parameter_code");

    let mut statement = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row<'_>| {
        Ok(ParameterRequirement {
            requirement_id: row.get(0)?,
            product_category: row.get(1)?,
            parameter_code: row.get(2)?,
            parameter_name: row.get(3)?,
            canonical_unit: row.get(4)?,
            require_fssai: row.get(5)?,
            require_eu: row.get(6)?,
            require_codex: row.get(7)?,
            require_haccp_internal: row.get(8)?,
            is_mandatory: row.get(9)?,
            effective_from: row.get(10)?,
            effective_to: row.get(11)?,
            source_note: row.get(12)?,
        })
    };

    let rows = match product_category {
        Some(category) => statement
            .query_map(rusqlite::params![as_of, category], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
        None => statement
            .query_map(rusqlite::params![as_of], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clock::FixedClock;
    use crate::model::StandardName;
    use crate::store::open_in_memory;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap())
    }

    fn sample(effective_from: &str) -> RequirementUpsert {
        RequirementUpsert {
            product_category: "TRAD-NUTRI-500G".to_string(),
            parameter_code: String::new(),
            parameter_name: "Aflatoxin B1".to_string(),
            canonical_unit: "ppb".to_string(),
            require_fssai: true,
            require_eu: false,
            require_codex: false,
            require_haccp_internal: false,
            is_mandatory: true,
            effective_from: effective_from.parse().unwrap(),
            effective_to: None,
            source_note: Some("FSSAI contaminant schedule".to_string()),
        }
    }

    #[test]
    fn upsert_normalizes_code_and_unit() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        upsert_parameter_requirement(&mut conn, &clock, "admin", &sample("2026-01-01")).unwrap();

        let rows =
            active_parameter_requirements(&conn, "2026-01-15".parse().unwrap(), None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].parameter_code, "AFLA_B1");
        assert_eq!(rows[0].canonical_unit, "ug/kg");
        assert!(rows[0].requires_standard(StandardName::Fssai));
        assert!(!rows[0].requires_standard(StandardName::Eu));
    }

    #[test]
    fn upsert_replaces_existing_window_row() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        let first =
            upsert_parameter_requirement(&mut conn, &clock, "admin", &sample("2026-01-01"))
                .unwrap();
        let mut updated = sample("2026-01-01");
        updated.require_eu = true;
        let second =
            upsert_parameter_requirement(&mut conn, &clock, "admin", &updated).unwrap();
        assert_eq!(first, second);

        let rows =
            active_parameter_requirements(&conn, "2026-02-01".parse().unwrap(), None).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].require_eu);
    }

    #[test]
    fn active_rows_respect_window_and_category_filter() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        let mut bounded = sample("2026-01-01");
        bounded.effective_to = Some("2026-06-30".parse().unwrap());
        upsert_parameter_requirement(&mut conn, &clock, "admin", &bounded).unwrap();

        let before =
            active_parameter_requirements(&conn, "2025-12-31".parse().unwrap(), None).unwrap();
        assert!(before.is_empty());
        let after =
            active_parameter_requirements(&conn, "2026-07-01".parse().unwrap(), None).unwrap();
        assert!(after.is_empty());
        let other = active_parameter_requirements(
            &conn,
            "2026-03-01".parse().unwrap(),
            Some("OTHER-SKU"),
        )
        .unwrap();
        assert!(other.is_empty());
        let hit = active_parameter_requirements(
            &conn,
            "2026-03-01".parse().unwrap(),
            Some("TRAD-NUTRI-500G"),
        )
        .unwrap();
        assert_eq!(hit.len(), 1);
    }
}
