use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Regulatory standards the engine accepts releases for. Imports against any
/// other standard are rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StandardName {
    Codex,
    Eu,
    Fssai,
    HaccpInternal,
}

pub const ALL_STANDARDS: [StandardName; 4] = [
    StandardName::Codex,
    StandardName::Eu,
    StandardName::Fssai,
    StandardName::HaccpInternal,
];

impl StandardName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Codex => "CODEX",
            Self::Eu => "EU",
            Self::Fssai => "FSSAI",
            Self::HaccpInternal => "HACCP_INTERNAL",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_uppercase().as_str() {
            "CODEX" => Ok(Self::Codex),
            "EU" => Ok(Self::Eu),
            "FSSAI" => Ok(Self::Fssai),
            "HACCP_INTERNAL" => Ok(Self::HaccpInternal),
            _ => Err(Error::validation(
                "standard_name must be one of CODEX, EU, FSSAI, HACCP_INTERNAL",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Draft,
    Approved,
    Published,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Published => "published",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "draft" => Ok(Self::Draft),
            "approved" => Ok(Self::Approved),
            "published" => Ok(Self::Published),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::internal(format!(
                "invalid release status in store: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// One imported regulatory document version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRelease {
    pub release_id: String,
    pub standard_name: StandardName,
    pub release_code: String,
    pub jurisdiction: Option<String>,
    pub source_authority: String,
    pub document_title: String,
    pub document_url: Option<String>,
    pub publication_date: NaiveDate,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub review_status: ReviewStatus,
    pub imported_by: String,
    pub imported_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub published_by: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub row_count: i64,
    pub notes: Option<String>,
}

/// One parameter limit within a release. Immutable once imported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdValueRow {
    pub value_id: String,
    pub release_id: String,
    pub product_category: String,
    pub parameter_code: String,
    pub parameter_name: String,
    pub limit_min: Option<Decimal>,
    pub limit_max: Option<Decimal>,
    pub unit: String,
    pub severity: Severity,
    pub source_clause: String,
    pub remarks: Option<String>,
}

/// A live, effective-dated threshold row used for batch evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceThreshold {
    pub threshold_id: String,
    pub parameter_code: String,
    pub standard_name: StandardName,
    pub product_category: String,
    pub limit_min: Option<Decimal>,
    pub limit_max: Option<Decimal>,
    pub unit: String,
    pub severity: Severity,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub source_ref: String,
}

/// Governance policy row: which standards must cover a
/// (product_category, parameter_code) pair, and in which canonical unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterRequirement {
    pub requirement_id: String,
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

impl ParameterRequirement {
    pub fn requires_standard(&self, standard: StandardName) -> bool {
        match standard {
            StandardName::Fssai => self.require_fssai,
            StandardName::Eu => self.require_eu,
            StandardName::Codex => self.require_codex,
            StandardName::HaccpInternal => self.require_haccp_internal,
        }
    }
}

/// Append-only hash-chained audit record. `event_time` is stored exactly as
/// hashed so the chain can be re-verified from persisted fields alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub audit_id: String,
    pub seq: i64,
    pub actor_id: String,
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub event_time: String,
    pub payload: serde_json::Value,
    pub prev_hash: Option<String>,
    pub event_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Pass,
    Warning,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskFlag {
    Normal,
    NearUpperLimit,
    NearLowerLimit,
    OutOfRange,
}

/// Per-parameter comparison outcome, computed fresh from live thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub parameter: String,
    pub batch_value: f64,
    pub unit: String,
    pub fssai_limit: Option<String>,
    pub eu_limit: Option<String>,
    pub codex_limit: Option<String>,
    pub haccp_limit: Option<String>,
    pub status: CheckStatus,
    pub risk_flag: RiskFlag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingRequirement {
    pub product_category: String,
    pub parameter_code: String,
    pub parameter_name: String,
    pub canonical_unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitMismatch {
    pub product_category: String,
    pub parameter_code: String,
    pub expected_unit: String,
    pub release_unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRef {
    pub product_category: String,
    pub parameter_code: String,
    pub parameter_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryCoverage {
    pub required: usize,
    pub present: usize,
    pub missing: usize,
}

/// Coverage verdict for one candidate release against the requirement
/// profile active at its effective_from date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseCoverageReport {
    pub release_id: String,
    pub standard_name: StandardName,
    pub release_code: String,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub requirement_rows: usize,
    pub release_rows: usize,
    pub ready_for_approval: bool,
    pub ready_for_publish: bool,
    pub missing_required: Vec<MissingRequirement>,
    pub unit_mismatches: Vec<UnitMismatch>,
    pub missing_source_clause: Vec<RowRef>,
    pub extra_rows: Vec<RowRef>,
    pub product_category_summary: BTreeMap<String, CategoryCoverage>,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardCoverage {
    pub required: bool,
    pub present: bool,
    pub unit_ok: bool,
    pub observed_unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementCoverageRow {
    pub product_category: String,
    pub parameter_code: String,
    pub parameter_name: String,
    pub canonical_unit: String,
    pub standards: BTreeMap<String, StandardCoverage>,
    pub fully_covered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveCoverageSummary {
    pub requirement_rows: usize,
    pub fully_covered_rows: usize,
    pub coverage_pct: f64,
}

/// Coverage of the live threshold table against the requirement profile as
/// of a given date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveCoverageReport {
    pub as_of: NaiveDate,
    pub rows: Vec<RequirementCoverageRow>,
    pub summary: ActiveCoverageSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSummary {
    pub release_id: String,
    pub standard_name: StandardName,
    pub release_code: String,
    pub review_status: ReviewStatus,
    pub row_count: usize,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub normalized_unit_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveOutcome {
    pub release_id: String,
    pub review_status: ReviewStatus,
    pub idempotent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub release_id: String,
    pub review_status: ReviewStatus,
    pub closed_previous_rows: usize,
    pub inserted_rows: usize,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseDetail {
    pub release: ThresholdRelease,
    pub threshold_rows: Vec<ThresholdValueRow>,
}
