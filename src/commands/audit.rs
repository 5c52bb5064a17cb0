use anyhow::{bail, Result};

use super::{open, print_json};
use crate::audit::verify_audit_chain;
use crate::audit_pack::{generate_audit_pack, verify_audit_pack, PackFilters};
use crate::cli::{AuditPackArgs, AuditPackVerifyArgs, DbArgs};
use crate::clock::SystemClock;

pub fn audit_verify(args: DbArgs) -> Result<()> {
    let conn = open(&args.db_path)?;
    let verification = verify_audit_chain(&conn)?;
    print_json(&verification)?;
    if !verification.valid {
        bail!(
            "audit chain verification failed with {} issue(s)",
            verification.issues.len()
        );
    }
    Ok(())
}

pub fn audit_pack(args: AuditPackArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let summary = generate_audit_pack(
        &mut conn,
        &clock,
        &args.storage_root,
        &args.created_by,
        &PackFilters {
            limit: args.limit,
            actor_id: args.actor_id,
            action_type: args.action_type,
            entity_type: args.entity_type,
            entity_id: args.entity_id,
            from_ts: args.from_ts,
            to_ts: args.to_ts,
        },
        args.notes.as_deref(),
    )?;
    print_json(&summary)
}

pub fn audit_pack_verify(args: AuditPackVerifyArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let Some(verification) =
        verify_audit_pack(&mut conn, &clock, &args.pack_id, &args.verified_by)?
    else {
        bail!("audit pack not found: {}", args.pack_id);
    };
    print_json(&verification)?;
    if !verification.valid {
        bail!("audit pack verification failed");
    }
    Ok(())
}
