use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Query sandbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Path to the SQLite database file.
    #[serde(default = "d_db_path")]
    pub db_path: PathBuf,
    /// Hard cap on rows returned by a single query.  The true row count is
    /// still reported; results over the cap are marked truncated.
    #[serde(default = "d_max_result_rows")]
    pub max_result_rows: u64,
    /// TTL for the per-query result cache.  Only successful, non-truncated
    /// results are cached.
    #[serde(default = "d_query_cache_ttl_secs")]
    pub query_cache_ttl_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            db_path: d_db_path(),
            max_result_rows: d_max_result_rows(),
            query_cache_ttl_secs: d_query_cache_ttl_secs(),
        }
    }
}

fn d_db_path() -> PathBuf {
    PathBuf::from("data/app.db")
}
fn d_max_result_rows() -> u64 {
    500
}
fn d_query_cache_ttl_secs() -> u64 {
    60
}
