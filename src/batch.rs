//! Production batch and quality-observation registration. Observations are
//! parameter-code and unit normalized on the way in so the comparator joins
//! cleanly against live thresholds.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::audit::append_audit_event;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::params::normalize_parameter_code;
use crate::units::normalize_unit;

pub(crate) fn find_batch(conn: &Connection, batch_code: &str) -> Result<Option<(String, String)>> {
    let row = conn
        .query_row(
            "SELECT batch_id, product_sku FROM production_batches WHERE batch_code = ?1",
            [batch_code],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn require_batch(conn: &Connection, batch_code: &str) -> Result<(String, String)> {
    find_batch(conn, batch_code)?
        .ok_or_else(|| Error::not_found(format!("Batch not found: {batch_code}")))
}

pub fn create_batch(
    conn: &mut Connection,
    clock: &dyn Clock,
    actor_id: &str,
    batch_code: &str,
    product_sku: &str,
    produced_at: Option<DateTime<Utc>>,
) -> Result<String> {
    let batch_code = batch_code.trim();
    if batch_code.is_empty() {
        return Err(Error::validation("batch_code is required"));
    }
    let product_sku = product_sku.trim();
    if product_sku.is_empty() {
        return Err(Error::validation("product_sku is required"));
    }

    let batch_id = Uuid::new_v4().to_string();
    let produced_at = produced_at.unwrap_or_else(|| clock.now());

    let tx = conn.transaction()?;
    let inserted = tx.execute(
        "INSERT INTO production_batches (batch_id, batch_code, product_sku, produced_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![batch_id, batch_code, product_sku, produced_at],
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(Error::conflict(format!(
                "batch_code '{batch_code}' already exists"
            )));
        }
        Err(err) => return Err(err.into()),
    }

    append_audit_event(
        &tx,
        clock,
        actor_id,
        "BATCH_REGISTERED",
        "batch",
        &batch_id,
        serde_json::json!({
            "batch_code": batch_code,
            "product_sku": product_sku,
        }),
    )?;
    tx.commit()?;

    Ok(batch_id)
}

pub fn record_quality_test(
    conn: &mut Connection,
    clock: &dyn Clock,
    actor_id: &str,
    batch_code: &str,
    parameter_name: &str,
    observed_value: f64,
    unit: &str,
    tested_at: Option<DateTime<Utc>>,
) -> Result<String> {
    let parameter_name = parameter_name.trim();
    if parameter_name.is_empty() {
        return Err(Error::validation("parameter_name is required"));
    }

    let (batch_id, _) = require_batch(conn, batch_code)?;
    let test_id = Uuid::new_v4().to_string();
    let parameter_code = normalize_parameter_code(parameter_name);
    let unit = normalize_unit(unit);
    let tested_at = tested_at.unwrap_or_else(|| clock.now());

    let tx = conn.transaction()?;
    tx.execute(
        "
        INSERT INTO quality_test_records (
          test_id, batch_id, report_id, parameter_code, parameter_name,
          observed_value, unit, tested_at
        ) VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7)
        ",
        rusqlite::params![
            test_id,
            batch_id,
            parameter_code,
            parameter_name,
            observed_value,
            unit,
            tested_at
        ],
    )?;
    append_audit_event(
        &tx,
        clock,
        actor_id,
        "QUALITY_TEST_RECORDED",
        "quality_test",
        &test_id,
        serde_json::json!({
            "batch_code": batch_code,
            "parameter_code": parameter_code,
            "observed_value": observed_value,
            "unit": unit,
        }),
    )?;
    tx.commit()?;

    Ok(test_id)
}
