use anyhow::Result;

use super::{open, print_json};
use crate::cli::ScoreBatchArgs;
use crate::clock::SystemClock;
use crate::risk::score_batch_and_store;

pub fn score_batch(args: ScoreBatchArgs) -> Result<()> {
    let mut conn = open(&args.db.db_path)?;
    let clock = SystemClock;
    let outcome = score_batch_and_store(&mut conn, &clock, &args.batch_code, &args.actor)?;
    print_json(&outcome)
}
