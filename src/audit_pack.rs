//! Exportable audit packs: a CSV of ledger entries plus a JSON manifest and
//! per-file sha256 checksums, written under a timestamped folder and
//! registered in the store. Verification reports every missing file and hash
//! mismatch; it never repairs anything.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{append_audit_event, audit_events_to_csv, list_audit_events, AuditFilter};
use crate::clock::Clock;
use crate::util::{ensure_directory, rfc3339_utc, sha256_file, utc_compact_string, write_json_pretty};

const CSV_FILE: &str = "audit_events.csv";
const MANIFEST_FILE: &str = "manifest.json";
const CHECKSUMS_FILE: &str = "checksums.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackFilters {
    pub limit: usize,
    pub actor_id: Option<String>,
    pub action_type: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub from_ts: Option<String>,
    pub to_ts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackManifest {
    pub pack_id: String,
    pub generated_at: String,
    pub created_by: String,
    pub row_count: usize,
    pub filters: PackFilters,
    pub notes: Option<String>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackSummary {
    pub pack_id: String,
    pub row_count: usize,
    pub created_by: String,
    pub folder_path: String,
    pub manifest_hash: String,
    pub checksums_hash: String,
}

pub fn generate_audit_pack(
    conn: &mut Connection,
    clock: &dyn Clock,
    storage_root: &Path,
    created_by: &str,
    filters: &PackFilters,
    notes: Option<&str>,
) -> Result<PackSummary> {
    let audit_filter = AuditFilter {
        actor_id: filters.actor_id.clone(),
        action_type: filters.action_type.clone(),
        entity_type: filters.entity_type.clone(),
        entity_id: filters.entity_id.clone(),
        from_ts: filters.from_ts.clone(),
        to_ts: filters.to_ts.clone(),
        limit: Some(filters.limit),
    };
    let entries = list_audit_events(conn, &audit_filter)?;

    let pack_id = Uuid::new_v4().to_string();
    let folder = storage_root
        .join("audit_packs")
        .join(format!("{}_{pack_id}", utc_compact_string(clock.now())));
    ensure_directory(&folder)?;

    let csv_path = folder.join(CSV_FILE);
    let manifest_path = folder.join(MANIFEST_FILE);
    let checksums_path = folder.join(CHECKSUMS_FILE);

    let csv_data = audit_events_to_csv(&entries)?;
    fs::write(&csv_path, &csv_data)
        .with_context(|| format!("failed to write {}", csv_path.display()))?;

    let manifest = PackManifest {
        pack_id: pack_id.clone(),
        generated_at: rfc3339_utc(clock.now()),
        created_by: created_by.to_string(),
        row_count: entries.len(),
        filters: filters.clone(),
        notes: notes.map(ToString::to_string),
        files: vec![
            CSV_FILE.to_string(),
            MANIFEST_FILE.to_string(),
            CHECKSUMS_FILE.to_string(),
        ],
    };
    write_json_pretty(&manifest_path, &manifest)?;

    let mut checksums = BTreeMap::new();
    checksums.insert(CSV_FILE.to_string(), sha256_file(&csv_path)?);
    checksums.insert(MANIFEST_FILE.to_string(), sha256_file(&manifest_path)?);
    write_json_pretty(&checksums_path, &checksums)?;

    let manifest_hash = sha256_file(&manifest_path)?;
    let checksums_hash = sha256_file(&checksums_path)?;

    let tx = conn.transaction()?;
    tx.execute(
        "
        INSERT INTO audit_packs (
          pack_id, created_at, created_by, status, filters, row_count,
          folder_path, manifest_hash, checksums_hash, notes
        ) VALUES (?1, ?2, ?3, 'generated', ?4, ?5, ?6, ?7, ?8, ?9)
        ",
        rusqlite::params![
            pack_id,
            clock.now(),
            created_by,
            serde_json::to_string(filters)?,
            entries.len() as i64,
            folder.display().to_string(),
            manifest_hash,
            checksums_hash,
            notes,
        ],
    )?;
    append_audit_event(
        &tx,
        clock,
        created_by,
        "AUDIT_PACK_GENERATED",
        "audit_pack",
        &pack_id,
        serde_json::json!({
            "row_count": entries.len(),
            "folder_path": folder.display().to_string(),
            "filters": serde_json::to_value(filters)?,
        }),
    )?;
    tx.commit()?;

    Ok(PackSummary {
        pack_id,
        row_count: entries.len(),
        created_by: created_by.to_string(),
        folder_path: folder.display().to_string(),
        manifest_hash,
        checksums_hash,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackIssue {
    pub file: String,
    pub issue: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackVerification {
    pub pack_id: String,
    pub valid: bool,
    pub missing_files: Vec<String>,
    pub mismatches: Vec<PackIssue>,
    pub verified_by: String,
    pub verified_at: String,
}

pub fn verify_audit_pack(
    conn: &mut Connection,
    clock: &dyn Clock,
    pack_id: &str,
    verified_by: &str,
) -> Result<Option<PackVerification>> {
    let stored: Option<(String, String, String)> = conn
        .query_row(
            "SELECT folder_path, manifest_hash, checksums_hash FROM audit_packs WHERE pack_id = ?1",
            [pack_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((folder_path, manifest_hash, checksums_hash)) = stored else {
        return Ok(None);
    };

    let folder = PathBuf::from(&folder_path);
    let csv_path = folder.join(CSV_FILE);
    let manifest_path = folder.join(MANIFEST_FILE);
    let checksums_path = folder.join(CHECKSUMS_FILE);

    let missing_files: Vec<String> = [&csv_path, &manifest_path, &checksums_path]
        .into_iter()
        .filter(|path| !path.exists())
        .map(|path| path.display().to_string())
        .collect();

    let mut mismatches = Vec::new();
    if missing_files.is_empty() {
        let raw = fs::read_to_string(&checksums_path)
            .with_context(|| format!("failed to read {}", checksums_path.display()))?;
        let checksums: BTreeMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", checksums_path.display()))?;

        for (name, expected) in &checksums {
            let file_path = folder.join(name);
            if !file_path.exists() {
                mismatches.push(PackIssue {
                    file: name.clone(),
                    issue: "missing".to_string(),
                    expected: Some(expected.clone()),
                    actual: None,
                });
                continue;
            }
            let actual = sha256_file(&file_path)?;
            if actual != *expected {
                mismatches.push(PackIssue {
                    file: name.clone(),
                    issue: "hash_mismatch".to_string(),
                    expected: Some(expected.clone()),
                    actual: Some(actual),
                });
            }
        }

        if sha256_file(&manifest_path)? != manifest_hash {
            mismatches.push(PackIssue {
                file: MANIFEST_FILE.to_string(),
                issue: "manifest_hash_mismatch".to_string(),
                expected: Some(manifest_hash),
                actual: Some(sha256_file(&manifest_path)?),
            });
        }
        if sha256_file(&checksums_path)? != checksums_hash {
            mismatches.push(PackIssue {
                file: CHECKSUMS_FILE.to_string(),
                issue: "checksums_hash_mismatch".to_string(),
                expected: Some(checksums_hash),
                actual: Some(sha256_file(&checksums_path)?),
            });
        }
    }

    let valid = missing_files.is_empty() && mismatches.is_empty();

    let tx = conn.transaction()?;
    append_audit_event(
        &tx,
        clock,
        verified_by,
        "AUDIT_PACK_VERIFIED",
        "audit_pack",
        pack_id,
        serde_json::json!({
            "valid": valid,
            "missing": missing_files,
            "mismatches": serde_json::to_value(&mismatches)?,
        }),
    )?;
    tx.commit()?;

    Ok(Some(PackVerification {
        pack_id: pack_id.to_string(),
        valid,
        missing_files,
        mismatches,
        verified_by: verified_by.to_string(),
        verified_at: rfc3339_utc(clock.now()),
    }))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::clock::FixedClock;
    use crate::store::open_in_memory;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 4, 1, 6, 0, 0).unwrap())
    }

    fn filters() -> PackFilters {
        PackFilters {
            limit: 100,
            actor_id: None,
            action_type: None,
            entity_type: None,
            entity_id: None,
            from_ts: None,
            to_ts: None,
        }
    }

    fn seed_events(conn: &Connection, clock: &dyn Clock) {
        for i in 0..3 {
            append_audit_event(
                conn,
                clock,
                "qa-lead",
                "REG_THRESHOLD_RELEASE_IMPORTED",
                "regulatory_release",
                &format!("rel-{i}"),
                json!({"row_count": i}),
            )
            .unwrap();
        }
    }

    #[test]
    fn generated_pack_verifies_clean() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        seed_events(&conn, &clock);
        let dir = tempfile::tempdir().unwrap();

        let summary =
            generate_audit_pack(&mut conn, &clock, dir.path(), "auditor", &filters(), None)
                .unwrap();
        assert_eq!(summary.row_count, 3);

        let verification = verify_audit_pack(&mut conn, &clock, &summary.pack_id, "auditor")
            .unwrap()
            .unwrap();
        assert!(verification.valid);
        assert!(verification.missing_files.is_empty());
        assert!(verification.mismatches.is_empty());
    }

    #[test]
    fn tampered_csv_is_reported_as_hash_mismatch() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        seed_events(&conn, &clock);
        let dir = tempfile::tempdir().unwrap();

        let summary =
            generate_audit_pack(&mut conn, &clock, dir.path(), "auditor", &filters(), None)
                .unwrap();
        let csv_path = PathBuf::from(&summary.folder_path).join("audit_events.csv");
        fs::write(&csv_path, "tampered").unwrap();

        let verification = verify_audit_pack(&mut conn, &clock, &summary.pack_id, "auditor")
            .unwrap()
            .unwrap();
        assert!(!verification.valid);
        assert!(verification
            .mismatches
            .iter()
            .any(|issue| issue.file == "audit_events.csv" && issue.issue == "hash_mismatch"));
    }

    #[test]
    fn missing_file_is_reported_not_repaired() {
        let clock = clock();
        let mut conn = open_in_memory(&clock).unwrap();
        seed_events(&conn, &clock);
        let dir = tempfile::tempdir().unwrap();

        let summary =
            generate_audit_pack(&mut conn, &clock, dir.path(), "auditor", &filters(), None)
                .unwrap();
        let csv_path = PathBuf::from(&summary.folder_path).join("audit_events.csv");
        fs::remove_file(&csv_path).unwrap();

        let verification = verify_audit_pack(&mut conn, &clock, &summary.pack_id, "auditor")
            .unwrap()
            .unwrap();
        assert!(!verification.valid);
        assert_eq!(verification.missing_files.len(), 1);

        let unknown = verify_audit_pack(&mut conn, &clock, "missing-pack", "auditor").unwrap();
        assert!(unknown.is_none());
    }
}
