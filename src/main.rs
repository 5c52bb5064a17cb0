use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use foodtrace::cli::{Cli, Commands};
use foodtrace::commands;

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb(args) => commands::admin::init_db(args),
        Commands::RequirementUpsert(args) => commands::admin::requirement_upsert(args),
        Commands::ImportRelease(args) => commands::regulatory::import_release(args),
        Commands::ApproveRelease(args) => commands::regulatory::approve_release(args),
        Commands::PublishRelease(args) => commands::regulatory::publish_release(args),
        Commands::ReleaseCoverage(args) => commands::regulatory::release_coverage(args),
        Commands::ActiveCoverage(args) => commands::regulatory::active_coverage(args),
        Commands::RegisterBatch(args) => commands::batch::register_batch(args),
        Commands::RecordTest(args) => commands::batch::record_test(args),
        Commands::IngestLabReport(args) => commands::batch::lab_report(args),
        Commands::CompareBatch(args) => commands::batch::compare_batch(args),
        Commands::CcpRule(args) => commands::ccp::ccp_rule(args),
        Commands::IngestCcp(args) => commands::ccp::ingest_ccp(args),
        Commands::AnomalyScan(args) => commands::ccp::anomaly_scan(args),
        Commands::ScoreBatch(args) => commands::risk::score_batch(args),
        Commands::AuditVerify(args) => commands::audit::audit_verify(args),
        Commands::AuditPack(args) => commands::audit::audit_pack(args),
        Commands::AuditPackVerify(args) => commands::audit::audit_pack_verify(args),
        Commands::Status(args) => commands::admin::status(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
