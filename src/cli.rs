use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "foodtrace",
    version,
    about = "Supply-chain traceability and food-safety compliance tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or migrate the local database.
    InitDb(DbArgs),
    /// Create or replace one parameter requirement row.
    RequirementUpsert(RequirementUpsertArgs),
    /// Import a threshold release CSV as a draft.
    ImportRelease(ImportReleaseCliArgs),
    /// Approve a draft release after its coverage gate.
    ApproveRelease(ApproveReleaseArgs),
    /// Publish an approved release, cutting over live thresholds.
    PublishRelease(PublishReleaseArgs),
    /// Coverage report for one release.
    ReleaseCoverage(ReleaseCoverageArgs),
    /// Coverage report for the live threshold table.
    ActiveCoverage(ActiveCoverageArgs),
    /// Register a production batch.
    RegisterBatch(RegisterBatchArgs),
    /// Record one quality-test observation for a batch.
    RecordTest(RecordTestArgs),
    /// Ingest extracted lab-report text for a batch.
    IngestLabReport(IngestLabReportArgs),
    /// Evaluate a batch against the active multi-standard thresholds.
    CompareBatch(CompareBatchArgs),
    /// Create a CCP monitoring rule.
    CcpRule(CcpRuleArgs),
    /// Ingest one CCP sensor reading.
    IngestCcp(IngestCcpArgs),
    /// Run the z-score process-drift scan.
    AnomalyScan(AnomalyScanArgs),
    /// Score a batch and persist the result.
    ScoreBatch(ScoreBatchArgs),
    /// Verify the audit hash chain end to end.
    AuditVerify(DbArgs),
    /// Generate an audit export pack.
    AuditPack(AuditPackArgs),
    /// Verify a previously generated audit pack.
    AuditPackVerify(AuditPackVerifyArgs),
    /// Summarize database contents and chain head.
    Status(DbArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    #[arg(long, default_value = ".cache/foodtrace/foodtrace.sqlite")]
    pub db_path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct RequirementUpsertArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub product_category: String,

    #[arg(long)]
    pub parameter_name: String,

    #[arg(long, default_value = "")]
    pub parameter_code: String,

    #[arg(long)]
    pub canonical_unit: String,

    #[arg(long, default_value_t = false)]
    pub require_fssai: bool,

    #[arg(long, default_value_t = false)]
    pub require_eu: bool,

    #[arg(long, default_value_t = false)]
    pub require_codex: bool,

    #[arg(long, default_value_t = false)]
    pub require_haccp_internal: bool,

    #[arg(long)]
    pub effective_from: String,

    #[arg(long)]
    pub effective_to: Option<String>,

    #[arg(long)]
    pub source_note: Option<String>,

    #[arg(long, default_value = "admin")]
    pub actor: String,
}

#[derive(Args, Debug, Clone)]
pub struct ImportReleaseCliArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub standard: String,

    #[arg(long)]
    pub release_code: String,

    #[arg(long)]
    pub document_title: String,

    #[arg(long)]
    pub effective_from: String,

    #[arg(long)]
    pub effective_to: Option<String>,

    #[arg(long)]
    pub source_authority: String,

    #[arg(long)]
    pub publication_date: String,

    #[arg(long)]
    pub jurisdiction: Option<String>,

    #[arg(long)]
    pub document_url: Option<String>,

    #[arg(long)]
    pub notes: Option<String>,

    #[arg(long)]
    pub csv_path: PathBuf,

    #[arg(long, default_value = "admin")]
    pub imported_by: String,
}

#[derive(Args, Debug, Clone)]
pub struct ApproveReleaseArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub release_id: String,

    #[arg(long, default_value = "admin")]
    pub approved_by: String,

    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PublishReleaseArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub release_id: String,

    #[arg(long, default_value = "admin")]
    pub published_by: String,
}

#[derive(Args, Debug, Clone)]
pub struct ReleaseCoverageArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub release_id: String,
}

#[derive(Args, Debug, Clone)]
pub struct ActiveCoverageArgs {
    #[command(flatten)]
    pub db: DbArgs,

    /// YYYY-MM-DD; defaults to today.
    #[arg(long)]
    pub as_of: Option<String>,

    #[arg(long)]
    pub product_category: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RegisterBatchArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub batch_code: String,

    #[arg(long)]
    pub product_sku: String,

    #[arg(long, default_value = "admin")]
    pub actor: String,
}

#[derive(Args, Debug, Clone)]
pub struct RecordTestArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub batch_code: String,

    #[arg(long)]
    pub parameter_name: String,

    #[arg(long)]
    pub observed_value: f64,

    #[arg(long)]
    pub unit: String,

    #[arg(long, default_value = "admin")]
    pub actor: String,
}

#[derive(Args, Debug, Clone)]
pub struct IngestLabReportArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub batch_code: String,

    #[arg(long)]
    pub lab_name: String,

    /// Path to collaborator-extracted report text.
    #[arg(long)]
    pub report_path: PathBuf,

    #[arg(long, default_value_t = false)]
    pub fssai_approved: bool,

    #[arg(long, default_value = "admin")]
    pub uploaded_by: String,
}

#[derive(Args, Debug, Clone)]
pub struct CompareBatchArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub batch_code: String,
}

#[derive(Args, Debug, Clone)]
pub struct CcpRuleArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub ccp_code: String,

    #[arg(long)]
    pub metric_name: String,

    #[arg(long)]
    pub unit: String,

    #[arg(long)]
    pub limit_min: Option<String>,

    #[arg(long)]
    pub limit_max: Option<String>,

    #[arg(long, default_value_t = 10.0)]
    pub warn_margin_pct: f64,

    #[arg(long, default_value = "critical")]
    pub severity: String,

    #[arg(long, default_value = "admin")]
    pub actor: String,
}

#[derive(Args, Debug, Clone)]
pub struct IngestCcpArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub batch_code: String,

    #[arg(long)]
    pub ccp_code: String,

    #[arg(long)]
    pub metric_name: String,

    #[arg(long)]
    pub metric_value: f64,

    #[arg(long)]
    pub unit: String,

    #[arg(long)]
    pub operator_id: Option<String>,

    #[arg(long, default_value = "manual")]
    pub source: String,
}

#[derive(Args, Debug, Clone)]
pub struct AnomalyScanArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long, default_value_t = 72)]
    pub lookback_hours: i64,

    #[arg(long, default_value_t = 2.5)]
    pub z_threshold: f64,

    #[arg(long, default_value = "system")]
    pub actor: String,
}

#[derive(Args, Debug, Clone)]
pub struct ScoreBatchArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub batch_code: String,

    #[arg(long, default_value = "system")]
    pub actor: String,
}

#[derive(Args, Debug, Clone)]
pub struct AuditPackArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long, default_value = ".cache/foodtrace")]
    pub storage_root: PathBuf,

    #[arg(long, default_value_t = 200)]
    pub limit: usize,

    #[arg(long)]
    pub actor_id: Option<String>,

    #[arg(long)]
    pub action_type: Option<String>,

    #[arg(long)]
    pub entity_type: Option<String>,

    #[arg(long)]
    pub entity_id: Option<String>,

    #[arg(long)]
    pub from_ts: Option<String>,

    #[arg(long)]
    pub to_ts: Option<String>,

    #[arg(long)]
    pub notes: Option<String>,

    #[arg(long, default_value = "admin")]
    pub created_by: String,
}

#[derive(Args, Debug, Clone)]
pub struct AuditPackVerifyArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub pack_id: String,

    #[arg(long, default_value = "admin")]
    pub verified_by: String,
}
