//! Plan and tool-run data model.
//!
//! A [`Plan`] is the ordered set of data-access steps proposed for one
//! question.  Plans are immutable once produced; a retry produces a new
//! plan.  Executing a plan yields one [`ToolRun`] per step, each carrying
//! a compact [`RunDigest`] that downstream consumers (diagnostics, the
//! summarizer, the answer-cache fingerprint) read instead of raw rows.

use serde::{Deserialize, Serialize};

/// An ordered list of tool invocations proposed to answer one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub needs_data: bool,
    pub steps: Vec<PlanStep>,
    pub notes: Option<String>,
}

impl Plan {
    /// A degraded plan that requests no data.  Produced when the planner
    /// output could not be interpreted.
    pub fn empty(notes: Option<String>) -> Self {
        Self { needs_data: false, steps: Vec::new(), notes }
    }
}

/// A single step of a plan: one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub tool: String,
    pub description: String,
    /// Tool arguments as a JSON object (name → value).
    pub arguments: serde_json::Value,
}

/// Outcome of executing one plan step.  Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRun {
    pub step_id: String,
    pub tool: String,
    pub arguments: serde_json::Value,
    pub summary: RunDigest,
    /// Full tool result, kept for audit/debug output only.
    pub raw: serde_json::Value,
    /// Set when the step could not be executed at all (as opposed to a
    /// structured `success=false` result inside `summary`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Compact, truncation-aware summary of one tool result.
///
/// `complete_result`/`omitted_rows` tell the summarizer whether
/// `sample_rows` is the whole result set or a preview, so it never claims
/// completeness falsely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunDigest {
    pub tool: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_tables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_total_tables: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rows: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub omitted_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_result: Option<bool>,
    pub truncated: bool,
}
