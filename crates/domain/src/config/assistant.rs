use serde::{Deserialize, Serialize};

/// Orchestration behaviour: retries, fallback, caching, and digest sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// How many trailing history messages are kept in prompts.
    #[serde(default = "d_max_history_messages")]
    pub max_history_messages: usize,
    /// TTL for cached final answers.
    #[serde(default = "d_answer_cache_ttl_secs")]
    pub answer_cache_ttl_secs: u64,
    /// Bounded planning attempts before the deterministic fallback takes
    /// over for good.
    #[serde(default = "d_max_plan_attempts")]
    pub max_plan_attempts: u32,
    /// Disable the deterministic fallback planner entirely.
    #[serde(default)]
    pub disable_fallback: bool,
    /// Row cap in result digests for detailed listings.
    #[serde(default = "d_max_digest_rows")]
    pub max_digest_rows: usize,
    /// Row cap in result digests for aggregate-shaped results.  Aggregates
    /// are information-dense and cheap to show, so they get a higher cap
    /// than detailed listings.
    #[serde(default = "d_aggregate_digest_rows")]
    pub aggregate_digest_rows: usize,
    /// Per-cell character clip in result digests.
    #[serde(default = "d_max_cell_chars")]
    pub max_cell_chars: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            max_history_messages: d_max_history_messages(),
            answer_cache_ttl_secs: d_answer_cache_ttl_secs(),
            max_plan_attempts: d_max_plan_attempts(),
            disable_fallback: false,
            max_digest_rows: d_max_digest_rows(),
            aggregate_digest_rows: d_aggregate_digest_rows(),
            max_cell_chars: d_max_cell_chars(),
        }
    }
}

fn d_max_history_messages() -> usize {
    10
}
fn d_answer_cache_ttl_secs() -> u64 {
    300
}
fn d_max_plan_attempts() -> u32 {
    4
}
fn d_max_digest_rows() -> usize {
    20
}
fn d_aggregate_digest_rows() -> usize {
    50
}
fn d_max_cell_chars() -> usize {
    180
}
