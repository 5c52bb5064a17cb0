//! Append-only, hash-chained audit ledger. Every governance and quality
//! mutation appends exactly one entry per logically distinct event, inside
//! the same transaction as the mutation's own writes, so a rollback discards
//! the audit entry too.

use rusqlite::{Connection, OptionalExtension, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::AuditLogEntry;
use crate::util::{rfc3339_utc, sha256_hex};

const HASH_DELIMITER: char = '|';

/// Compact JSON with deterministic key ordering. `serde_json` maps are
/// BTree-backed here, so serializing a `Value` already yields sorted keys.
pub fn canonical_payload(payload: &serde_json::Value) -> Result<String> {
    Ok(serde_json::to_string(payload)?)
}

fn chain_hash(
    prev_hash: Option<&str>,
    action_type: &str,
    entity_type: &str,
    entity_id: &str,
    canonical: &str,
    event_time: &str,
) -> String {
    let base = format!(
        "{}{d}{}{d}{}{d}{}{d}{}{d}{}",
        prev_hash.unwrap_or_default(),
        action_type,
        entity_type,
        entity_id,
        canonical,
        event_time,
        d = HASH_DELIMITER,
    );
    sha256_hex(base.as_bytes())
}

/// Appends one entry and returns its event hash. The previous entry is
/// located by the transactionally assigned `seq` counter rather than by
/// timestamp, so concurrent-writer clock skew cannot fork the chain.
pub fn append_audit_event(
    conn: &Connection,
    clock: &dyn Clock,
    actor_id: &str,
    action_type: &str,
    entity_type: &str,
    entity_id: &str,
    payload: serde_json::Value,
) -> Result<String> {
    let next_seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM audit_logs",
        [],
        |row| row.get(0),
    )?;
    let prev_hash: Option<String> = conn
        .query_row(
            "SELECT event_hash FROM audit_logs ORDER BY seq DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let canonical = canonical_payload(&payload)?;
    let event_time = rfc3339_utc(clock.now());
    let event_hash = chain_hash(
        prev_hash.as_deref(),
        action_type,
        entity_type,
        entity_id,
        &canonical,
        &event_time,
    );

    conn.execute(
        "
        INSERT INTO audit_logs (
          audit_id, seq, actor_id, action_type, entity_type, entity_id,
          event_time, payload, prev_hash, event_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            next_seq,
            actor_id,
            action_type,
            entity_type,
            entity_id,
            event_time,
            canonical,
            prev_hash,
            event_hash,
        ],
    )?;

    Ok(event_hash)
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub actor_id: Option<String>,
    pub action_type: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub from_ts: Option<String>,
    pub to_ts: Option<String>,
    pub limit: Option<usize>,
}

/// Most-recent-first listing with optional field filters.
pub fn list_audit_events(conn: &Connection, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(actor_id) = &filter.actor_id {
        clauses.push("actor_id = ?");
        values.push(Box::new(actor_id.clone()));
    }
    if let Some(action_type) = &filter.action_type {
        clauses.push("action_type = ?");
        values.push(Box::new(action_type.clone()));
    }
    if let Some(entity_type) = &filter.entity_type {
        clauses.push("entity_type = ?");
        values.push(Box::new(entity_type.clone()));
    }
    if let Some(entity_id) = &filter.entity_id {
        clauses.push("entity_id = ?");
        values.push(Box::new(entity_id.clone()));
    }
    if let Some(from_ts) = &filter.from_ts {
        clauses.push("event_time >= ?");
        values.push(Box::new(from_ts.clone()));
    }
    if let Some(to_ts) = &filter.to_ts {
        clauses.push("event_time <= ?");
        values.push(Box::new(to_ts.clone()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let limit = filter.limit.unwrap_or(200);
    values.push(Box::new(limit as i64));

    let sql = format!(
        "
        SELECT audit_id, seq, actor_id, action_type, entity_type, entity_id,
               event_time, payload, prev_hash, event_hash
        FROM audit_logs
        {where_sql}
        ORDER BY seq DESC
        LIMIT ?
        "
    );

    let mut statement = conn.prepare(&sql)?;
    let params: Vec<&dyn ToSql> = values.iter().map(|value| value.as_ref()).collect();
    let mut rows = statement.query(params.as_slice())?;

    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(entry_from_row(row)?);
    }
    Ok(entries)
}

pub fn get_audit_event(conn: &Connection, audit_id: &str) -> Result<AuditLogEntry> {
    let entry = conn
        .query_row(
            "
            SELECT audit_id, seq, actor_id, action_type, entity_type, entity_id,
                   event_time, payload, prev_hash, event_hash
            FROM audit_logs
            WHERE audit_id = ?1
            ",
            [audit_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, String>(9)?,
                ))
            },
        )
        .optional()?;

    let Some(raw) = entry else {
        return Err(Error::not_found(format!("Audit event not found: {audit_id}")));
    };
    build_entry(raw)
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> Result<AuditLogEntry> {
    let raw = (
        row.get::<_, String>(0)?,
        row.get::<_, i64>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, String>(3)?,
        row.get::<_, String>(4)?,
        row.get::<_, String>(5)?,
        row.get::<_, String>(6)?,
        row.get::<_, String>(7)?,
        row.get::<_, Option<String>>(8)?,
        row.get::<_, String>(9)?,
    );
    build_entry(raw)
}

type RawEntry = (
    String,
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
);

fn build_entry(raw: RawEntry) -> Result<AuditLogEntry> {
    let (
        audit_id,
        seq,
        actor_id,
        action_type,
        entity_type,
        entity_id,
        event_time,
        payload,
        prev_hash,
        event_hash,
    ) = raw;
    Ok(AuditLogEntry {
        audit_id,
        seq,
        actor_id,
        action_type,
        entity_type,
        entity_id,
        event_time,
        payload: serde_json::from_str(&payload)?,
        prev_hash,
        event_hash,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainIssueKind {
    HashMismatch,
    BrokenLink,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainIssue {
    pub seq: i64,
    pub audit_id: String,
    pub kind: ChainIssueKind,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    pub entries_checked: usize,
    pub valid: bool,
    pub issues: Vec<ChainIssue>,
}

/// Recomputes every stored hash from its own recorded fields and checks the
/// prev-hash linkage end to end. Issues are reported, never repaired.
pub fn verify_audit_chain(conn: &Connection) -> Result<ChainVerification> {
    let mut statement = conn.prepare(
        "
        SELECT audit_id, seq, actor_id, action_type, entity_type, entity_id,
               event_time, payload, prev_hash, event_hash
        FROM audit_logs
        ORDER BY seq ASC
        ",
    )?;
    let mut rows = statement.query([])?;

    let mut issues = Vec::new();
    let mut checked = 0_usize;
    let mut expected_prev: Option<String> = None;

    while let Some(row) = rows.next()? {
        let audit_id: String = row.get(0)?;
        let seq: i64 = row.get(1)?;
        let action_type: String = row.get(3)?;
        let entity_type: String = row.get(4)?;
        let entity_id: String = row.get(5)?;
        let event_time: String = row.get(6)?;
        let payload: String = row.get(7)?;
        let prev_hash: Option<String> = row.get(8)?;
        let event_hash: String = row.get(9)?;
        checked += 1;

        if prev_hash != expected_prev {
            issues.push(ChainIssue {
                seq,
                audit_id: audit_id.clone(),
                kind: ChainIssueKind::BrokenLink,
                detail: format!(
                    "prev_hash {:?} does not match preceding event_hash {:?}",
                    prev_hash, expected_prev
                ),
            });
        }

        let recomputed = chain_hash(
            prev_hash.as_deref(),
            &action_type,
            &entity_type,
            &entity_id,
            &payload,
            &event_time,
        );
        if recomputed != event_hash {
            issues.push(ChainIssue {
                seq,
                audit_id,
                kind: ChainIssueKind::HashMismatch,
                detail: format!("stored {event_hash} but recomputed {recomputed}"),
            });
        }

        expected_prev = Some(event_hash);
    }

    Ok(ChainVerification {
        entries_checked: checked,
        valid: issues.is_empty(),
        issues,
    })
}

/// Flat CSV export of ledger entries, payloads as canonical JSON strings.
pub fn audit_events_to_csv(entries: &[AuditLogEntry]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "audit_id",
        "seq",
        "event_time",
        "actor_id",
        "action_type",
        "entity_type",
        "entity_id",
        "prev_hash",
        "event_hash",
        "payload_json",
    ])?;

    for entry in entries {
        writer.write_record([
            entry.audit_id.as_str(),
            &entry.seq.to_string(),
            entry.event_time.as_str(),
            entry.actor_id.as_str(),
            entry.action_type.as_str(),
            entry.entity_type.as_str(),
            entry.entity_id.as_str(),
            entry.prev_hash.as_deref().unwrap_or_default(),
            entry.event_hash.as_str(),
            &canonical_payload(&entry.payload)?,
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| Error::internal(format!("csv buffer flush failed: {err}")))?;
    String::from_utf8(bytes).map_err(|err| Error::internal(format!("csv not utf-8: {err}")))
}

pub fn ledger_length(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM audit_logs", [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::clock::FixedClock;
    use crate::store::open_in_memory;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 2, 1, 9, 30, 0).unwrap())
    }

    #[test]
    fn canonical_payload_sorts_keys_compactly() {
        let payload = json!({"zeta": 1, "alpha": {"b": 2, "a": 1}});
        assert_eq!(
            canonical_payload(&payload).unwrap(),
            r#"{"alpha":{"a":1,"b":2},"zeta":1}"#
        );
    }

    #[test]
    fn append_links_entries_and_chain_verifies() {
        let clock = clock();
        let conn = open_in_memory(&clock).unwrap();

        let first = append_audit_event(
            &conn,
            &clock,
            "qa-lead",
            "REG_THRESHOLD_RELEASE_IMPORTED",
            "regulatory_release",
            "rel-1",
            json!({"row_count": 3}),
        )
        .unwrap();
        let second = append_audit_event(
            &conn,
            &clock,
            "qa-lead",
            "REG_THRESHOLD_RELEASE_APPROVED",
            "regulatory_release",
            "rel-1",
            json!({"release_code": "FSSAI-2026-01"}),
        )
        .unwrap();
        assert_ne!(first, second);

        let entries = list_audit_events(&conn, &AuditFilter::default()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 2);
        assert_eq!(entries[0].prev_hash.as_deref(), Some(first.as_str()));
        assert_eq!(entries[1].prev_hash, None);

        let verification = verify_audit_chain(&conn).unwrap();
        assert!(verification.valid);
        assert_eq!(verification.entries_checked, 2);
    }

    #[test]
    fn verify_detects_tampered_payload_and_broken_link() {
        let clock = clock();
        let conn = open_in_memory(&clock).unwrap();
        for i in 0..3 {
            append_audit_event(
                &conn,
                &clock,
                "system",
                "ANOMALY_SCAN_RUN",
                "anomaly_scan",
                &format!("scan-{i}"),
                json!({"created": i}),
            )
            .unwrap();
        }

        conn.execute(
            "UPDATE audit_logs SET payload = '{\"created\":99}' WHERE seq = 2",
            [],
        )
        .unwrap();

        let verification = verify_audit_chain(&conn).unwrap();
        assert!(!verification.valid);
        assert!(verification
            .issues
            .iter()
            .any(|issue| issue.seq == 2 && issue.kind == ChainIssueKind::HashMismatch));
    }

    #[test]
    fn list_filters_by_action_type_and_entity() {
        let clock = clock();
        let conn = open_in_memory(&clock).unwrap();
        append_audit_event(&conn, &clock, "a", "X", "batch", "b-1", json!({})).unwrap();
        append_audit_event(&conn, &clock, "a", "Y", "batch", "b-2", json!({})).unwrap();

        let filter = AuditFilter {
            action_type: Some("Y".to_string()),
            ..AuditFilter::default()
        };
        let entries = list_audit_events(&conn, &filter).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_id, "b-2");
    }

    #[test]
    fn csv_export_includes_header_and_rows() {
        let clock = clock();
        let conn = open_in_memory(&clock).unwrap();
        append_audit_event(&conn, &clock, "a", "X", "batch", "b-1", json!({"k": 1})).unwrap();

        let entries = list_audit_events(&conn, &AuditFilter::default()).unwrap();
        let csv_text = audit_events_to_csv(&entries).unwrap();
        let mut lines = csv_text.lines();
        assert!(lines.next().unwrap().starts_with("audit_id,seq,event_time"));
        assert!(csv_text.contains("\"{\"\"k\"\":1}\""));
    }
}
