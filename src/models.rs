//! Core Data Model
//!
//! The entities of the registry: tools, their verification artifacts,
//! usage events, and compositional recipes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trust tiers for tools. Strictly monotonic over a tool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Unverified submission
    Submitted,
    /// Passed the Gauntlet (sandbox verified)
    Verified,
    /// 10+ unique agents, 20+ successful uses
    BattleTested,
    /// 50+ unique agents, 100+ successful uses
    Community,
}

impl TrustLevel {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Submitted => 0,
            Self::Verified => 1,
            Self::BattleTested => 2,
            Self::Community => 3,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Self::Verified,
            2 => Self::BattleTested,
            v if v >= 3 => Self::Community,
            _ => Self::Submitted,
        }
    }
}

/// Lifecycle status of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Submitted, awaiting verification
    Pending,
    /// Currently in the Gauntlet
    Verifying,
    /// Verified and discoverable
    Active,
    /// Manually deprecated
    Deprecated,
    /// Rejected or removed by fitness decay
    Delisted,
}

impl ToolStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verifying => "verifying",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Delisted => "delisted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "verifying" => Self::Verifying,
            "active" => Self::Active,
            "deprecated" => Self::Deprecated,
            "delisted" => Self::Delisted,
            _ => Self::Pending,
        }
    }
}

/// Outcome of the static security scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityVerdict {
    Pass,
    Warning,
    Fail,
}

impl SecurityVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warning => "warning",
            Self::Fail => "fail",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "fail" => Self::Fail,
            "warning" => Self::Warning,
            _ => Self::Pass,
        }
    }
}

/// Why a submission was rejected. Closed set so callers can branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    SecurityScanFailed,
    TestFailed,
    SizeExceeded,
    ParseError,
    ParentNotFound,
}

impl RejectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecurityScanFailed => "security_scan_failed",
            Self::TestFailed => "test_failed",
            Self::SizeExceeded => "size_exceeded",
            Self::ParseError => "parse_error",
            Self::ParentNotFound => "parent_not_found",
        }
    }
}

/// A registered tool: code, test, schema, and quality metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    /// Derived from the first function/class definition in the code
    pub name: String,
    pub code: String,
    pub description: String,
    pub test_case: String,
    pub dependencies: Vec<String>,
    pub tags: Vec<String>,

    /// Generated JSON input schema (object/properties/required)
    pub input_schema: serde_json::Value,
    pub output_type: String,

    pub status: ToolStatus,
    pub trust_level: TrustLevel,

    pub fitness_score: f64,
    pub total_uses: i64,
    pub successful_uses: i64,
    pub unique_agents: i64,

    /// Deterministic digest of (code, description, test_case)
    pub content_hash: String,
    pub parent_tool_id: Option<String>,
    pub version: i64,
    pub author_agent_id: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,

    pub avg_execution_time_ms: f64,
    pub avg_memory_mb: f64,
}

impl Tool {
    /// A fresh tool record in pending state. The caller fills in schema,
    /// hash, and lineage fields before persisting.
    pub fn new(name: String, code: String, description: String, test_case: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            code,
            description,
            test_case,
            dependencies: Vec::new(),
            tags: Vec::new(),
            input_schema: serde_json::json!({}),
            output_type: "any".to_string(),
            status: ToolStatus::Pending,
            trust_level: TrustLevel::Submitted,
            fitness_score: 0.5,
            total_uses: 0,
            successful_uses: 0,
            unique_agents: 0,
            content_hash: String::new(),
            parent_tool_id: None,
            version: 1,
            author_agent_id: "anonymous".to_string(),
            created_at: now,
            updated_at: now,
            last_used_at: None,
            avg_execution_time_ms: 0.0,
            avg_memory_mb: 0.0,
        }
    }
}

/// What an agent sends when submitting a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSubmission {
    pub code: String,
    pub description: String,
    pub test_case: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "anonymous")]
    pub author_agent_id: String,
}

/// Request to fork an existing tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkRequest {
    pub parent_tool_id: String,
    pub code: String,
    pub description: String,
    pub test_case: String,
    #[serde(default)]
    pub reason: String,
    /// When omitted, inherited from the parent
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default = "anonymous")]
    pub author_agent_id: String,
}

fn anonymous() -> String {
    "anonymous".to_string()
}

/// Execution metrics from one Gauntlet run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub execution_time_ms: f64,
    pub memory_peak_mb: f64,
    pub output_size_bytes: usize,
    pub test_passed: bool,
    /// Captured stdout, truncated
    pub test_output: String,
    pub error_message: String,
}

/// One append-only provenance entry per verification event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub tool_id: String,
    pub version: i64,
    pub content_hash: String,
    pub parent_hash: Option<String>,
    pub parent_tool_id: Option<String>,
    pub author_agent_id: String,
    pub gauntlet_run_id: String,
    pub security_scan: SecurityVerdict,
    pub performance: PerformanceProfile,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

/// An agent's report of a tool usage outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub tool_id: String,
    #[serde(default = "anonymous")]
    pub agent_id: String,
    pub success: bool,
    #[serde(default)]
    pub execution_time_ms: f64,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub feedback: String,
}

/// A single step in a recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeStep {
    pub tool_id: String,
    pub tool_name: String,
    pub description: String,
    pub order: usize,
}

/// An ordered, immutable composition of verified tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<RecipeStep>,
    /// Mean step fitness at creation time. A snapshot, never refreshed.
    pub total_fitness: f64,
    pub total_uses: i64,
    pub successful_uses: i64,
    pub created_at: DateTime<Utc>,
    pub author_agent_id: String,
}

/// Lightweight tool info for listings and discovery results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub fitness_score: f64,
    pub trust_level: TrustLevel,
    pub status: ToolStatus,
    pub total_uses: i64,
    pub tags: Vec<String>,
}

impl ToolSummary {
    pub fn from_tool(tool: &Tool) -> Self {
        Self {
            id: tool.id.clone(),
            name: tool.name.clone(),
            description: tool.description.clone(),
            fitness_score: tool.fitness_score,
            trust_level: tool.trust_level,
            status: tool.status,
            total_uses: tool.total_uses,
            tags: tool.tags.clone(),
        }
    }
}

/// One ranked hit from semantic discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub tool: ToolSummary,
    pub similarity_score: f64,
    pub reason: String,
}
