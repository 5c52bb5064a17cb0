//! CLI glue: each subcommand opens the store, calls into the engine, and
//! prints the structured result as JSON.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::store::open_database;

pub mod admin;
pub mod audit;
pub mod batch;
pub mod ccp;
pub mod regulatory;
pub mod risk;

fn open(db_path: &Path) -> Result<Connection> {
    let clock = SystemClock;
    open_with_clock(db_path, &clock)
}

fn open_with_clock(db_path: &Path, clock: &dyn Clock) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        crate::util::ensure_directory(parent)?;
    }
    open_database(db_path, clock)
        .with_context(|| format!("failed to open database {}", db_path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
