//! SQLite store setup. Schema creation is idempotent and every governance
//! operation elsewhere in the crate runs inside one transaction on a
//! connection produced here.

use std::path::Path;

use rusqlite::Connection;

use crate::clock::Clock;
use crate::error::Result;
use crate::util::rfc3339_utc;

pub const DB_SCHEMA_VERSION: &str = "1.0.0";

pub fn open_database(path: &Path, clock: &dyn Clock) -> Result<Connection> {
    let connection = Connection::open(path)?;
    configure_connection(&connection)?;
    ensure_schema(&connection, clock)?;
    Ok(connection)
}

pub fn open_in_memory(clock: &dyn Clock) -> Result<Connection> {
    let connection = Connection::open_in_memory()?;
    ensure_schema(&connection, clock)?;
    Ok(connection)
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection.pragma_update(None, "journal_mode", "WAL")?;
    connection.pragma_update(None, "synchronous", "NORMAL")?;
    connection.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

pub fn ensure_schema(connection: &Connection, clock: &dyn Clock) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS regulatory_threshold_releases (
          release_id TEXT PRIMARY KEY,
          standard_name TEXT NOT NULL,
          release_code TEXT NOT NULL UNIQUE,
          jurisdiction TEXT,
          source_authority TEXT NOT NULL,
          document_title TEXT NOT NULL,
          document_url TEXT,
          publication_date TEXT NOT NULL,
          effective_from TEXT NOT NULL,
          effective_to TEXT,
          review_status TEXT NOT NULL DEFAULT 'draft',
          imported_by TEXT NOT NULL,
          imported_at TEXT NOT NULL,
          approved_by TEXT,
          approved_at TEXT,
          published_by TEXT,
          published_at TEXT,
          row_count INTEGER NOT NULL DEFAULT 0,
          notes TEXT
        );

        CREATE TABLE IF NOT EXISTS regulatory_threshold_values (
          value_id TEXT PRIMARY KEY,
          release_id TEXT NOT NULL,
          product_category TEXT NOT NULL,
          parameter_code TEXT NOT NULL,
          parameter_name TEXT NOT NULL,
          limit_min TEXT,
          limit_max TEXT,
          unit TEXT NOT NULL,
          severity TEXT NOT NULL,
          source_clause TEXT NOT NULL,
          remarks TEXT,
          UNIQUE(release_id, product_category, parameter_code),
          FOREIGN KEY(release_id) REFERENCES regulatory_threshold_releases(release_id)
        );

        CREATE TABLE IF NOT EXISTS compliance_thresholds (
          threshold_id TEXT PRIMARY KEY,
          parameter_code TEXT NOT NULL,
          standard_name TEXT NOT NULL,
          product_category TEXT NOT NULL,
          limit_min TEXT,
          limit_max TEXT,
          unit TEXT NOT NULL,
          severity TEXT NOT NULL,
          effective_from TEXT NOT NULL,
          effective_to TEXT,
          source_ref TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS regulatory_parameter_requirements (
          requirement_id TEXT PRIMARY KEY,
          product_category TEXT NOT NULL,
          parameter_code TEXT NOT NULL,
          parameter_name TEXT NOT NULL,
          canonical_unit TEXT NOT NULL,
          require_fssai INTEGER NOT NULL DEFAULT 0,
          require_eu INTEGER NOT NULL DEFAULT 0,
          require_codex INTEGER NOT NULL DEFAULT 0,
          require_haccp_internal INTEGER NOT NULL DEFAULT 0,
          is_mandatory INTEGER NOT NULL DEFAULT 1,
          effective_from TEXT NOT NULL,
          effective_to TEXT,
          source_note TEXT,
          UNIQUE(product_category, parameter_code, effective_from)
        );

        CREATE TABLE IF NOT EXISTS audit_logs (
          audit_id TEXT PRIMARY KEY,
          seq INTEGER NOT NULL UNIQUE,
          actor_id TEXT NOT NULL,
          action_type TEXT NOT NULL,
          entity_type TEXT NOT NULL,
          entity_id TEXT NOT NULL,
          event_time TEXT NOT NULL,
          payload TEXT NOT NULL,
          prev_hash TEXT,
          event_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS production_batches (
          batch_id TEXT PRIMARY KEY,
          batch_code TEXT NOT NULL UNIQUE,
          product_sku TEXT NOT NULL,
          produced_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS quality_test_records (
          test_id TEXT PRIMARY KEY,
          batch_id TEXT NOT NULL,
          report_id TEXT,
          parameter_code TEXT NOT NULL,
          parameter_name TEXT NOT NULL,
          observed_value REAL NOT NULL,
          unit TEXT NOT NULL,
          tested_at TEXT,
          FOREIGN KEY(batch_id) REFERENCES production_batches(batch_id)
        );

        CREATE TABLE IF NOT EXISTS lab_reports (
          report_id TEXT PRIMARY KEY,
          batch_id TEXT NOT NULL,
          report_hash TEXT NOT NULL,
          lab_name TEXT NOT NULL,
          fssai_approved INTEGER NOT NULL DEFAULT 0,
          version_no INTEGER NOT NULL,
          uploaded_by TEXT NOT NULL,
          uploaded_at TEXT NOT NULL,
          supersedes_report_id TEXT,
          FOREIGN KEY(batch_id) REFERENCES production_batches(batch_id)
        );

        CREATE TABLE IF NOT EXISTS ccp_rules (
          rule_id TEXT PRIMARY KEY,
          ccp_code TEXT NOT NULL,
          metric_name TEXT NOT NULL,
          unit TEXT NOT NULL,
          limit_min TEXT,
          limit_max TEXT,
          warn_margin_pct REAL NOT NULL DEFAULT 10.0,
          severity TEXT NOT NULL,
          active INTEGER NOT NULL DEFAULT 1,
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ccp_logs (
          ccp_log_id TEXT PRIMARY KEY,
          batch_id TEXT NOT NULL,
          ccp_code TEXT NOT NULL,
          metric_name TEXT NOT NULL,
          metric_value REAL NOT NULL,
          unit TEXT NOT NULL,
          measured_at TEXT NOT NULL,
          operator_id TEXT,
          source TEXT NOT NULL,
          FOREIGN KEY(batch_id) REFERENCES production_batches(batch_id)
        );

        CREATE TABLE IF NOT EXISTS alerts (
          alert_id TEXT PRIMARY KEY,
          batch_id TEXT NOT NULL,
          ccp_log_id TEXT,
          alert_type TEXT NOT NULL,
          severity TEXT NOT NULL,
          status TEXT NOT NULL DEFAULT 'open',
          title TEXT NOT NULL,
          message TEXT NOT NULL,
          details TEXT,
          detected_at TEXT NOT NULL,
          acknowledged_at TEXT,
          acknowledged_by TEXT
        );

        CREATE TABLE IF NOT EXISTS anomaly_events (
          anomaly_id TEXT PRIMARY KEY,
          source_ccp_log_id TEXT NOT NULL,
          batch_id TEXT NOT NULL,
          anomaly_type TEXT NOT NULL,
          metric_name TEXT NOT NULL,
          ccp_code TEXT NOT NULL,
          observed_value REAL NOT NULL,
          baseline_mean REAL NOT NULL,
          baseline_stddev REAL NOT NULL,
          z_score REAL NOT NULL,
          severity TEXT NOT NULL,
          details TEXT,
          detected_at TEXT NOT NULL,
          UNIQUE(source_ccp_log_id, anomaly_type)
        );

        CREATE TABLE IF NOT EXISTS ai_risk_scores (
          risk_id TEXT PRIMARY KEY,
          entity_type TEXT NOT NULL,
          entity_id TEXT NOT NULL,
          model_name TEXT NOT NULL,
          model_version TEXT NOT NULL,
          score REAL NOT NULL,
          risk_band TEXT NOT NULL,
          explanation TEXT,
          scored_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_packs (
          pack_id TEXT PRIMARY KEY,
          created_at TEXT NOT NULL,
          created_by TEXT NOT NULL,
          status TEXT NOT NULL DEFAULT 'generated',
          filters TEXT NOT NULL,
          row_count INTEGER NOT NULL,
          folder_path TEXT NOT NULL,
          manifest_hash TEXT NOT NULL,
          checksums_hash TEXT NOT NULL,
          notes TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_threshold_values_release
          ON regulatory_threshold_values(release_id, product_category, parameter_code);
        CREATE INDEX IF NOT EXISTS idx_compliance_thresholds_key
          ON compliance_thresholds(standard_name, product_category, parameter_code, effective_to);
        CREATE INDEX IF NOT EXISTS idx_requirements_window
          ON regulatory_parameter_requirements(effective_from, effective_to);
        CREATE INDEX IF NOT EXISTS idx_audit_logs_seq ON audit_logs(seq);
        CREATE INDEX IF NOT EXISTS idx_quality_tests_batch ON quality_test_records(batch_id);
        CREATE INDEX IF NOT EXISTS idx_ccp_logs_measured ON ccp_logs(measured_at);
        CREATE INDEX IF NOT EXISTS idx_alerts_batch_status ON alerts(batch_id, status);
        ",
    )?;

    let now = rfc3339_utc(clock.now());
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}
