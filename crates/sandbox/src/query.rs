//! Validated, row-capped, cached query execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use ia_domain::config::SandboxConfig;
use ia_domain::{Error, Result};

use crate::schema::{self, SchemaInfo};
use crate::validate::validate;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// QueryResult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured outcome of a sandbox query.
///
/// Invariants: `returned_rows <= row_count`, and `truncated` implies
/// `returned_rows < row_count`.  Failures (validation rejections, backend
/// errors) come back as `success=false` with the original error text;
/// the sandbox never retries and never panics on caller input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub rows: Vec<Value>,
    pub row_count: u64,
    pub returned_rows: u64,
    pub columns: Vec<String>,
    pub truncated: bool,
    pub error: Option<String>,
    pub query: String,
}

impl QueryResult {
    pub fn failure(query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            rows: Vec::new(),
            row_count: 0,
            returned_rows: 0,
            columns: Vec::new(),
            truncated: false,
            error: Some(error.into()),
            query: query.into(),
        }
    }
}

/// Snapshot of the query-cache population.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}

struct CachedQuery {
    stored_at: Instant,
    result: QueryResult,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SqliteSandbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-only sandbox over one SQLite file.
///
/// Opens a fresh connection per call; the schema cache and the per-query
/// result cache are the only shared state, each behind its own coarse
/// lock.
pub struct SqliteSandbox {
    config: SandboxConfig,
    schema_cache: RwLock<Option<Arc<SchemaInfo>>>,
    query_cache: Mutex<HashMap<String, CachedQuery>>,
}

impl SqliteSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        tracing::info!(db = %config.db_path.display(), "sandbox initialized");
        Self {
            config,
            schema_cache: RwLock::new(None),
            query_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub(crate) fn open(&self) -> rusqlite::Result<Connection> {
        Connection::open(&self.config.db_path)
    }

    /// Load the database schema, caching it indefinitely after the first
    /// successful load.
    pub fn schema(&self) -> Result<Arc<SchemaInfo>> {
        if let Some(cached) = self.schema_cache.read().clone() {
            return Ok(cached);
        }

        let conn = self
            .open()
            .map_err(|e| Error::Other(format!("open {}: {e}", self.config.db_path.display())))?;
        let schema = Arc::new(
            schema::load_schema(&conn).map_err(|e| Error::Other(format!("schema load: {e}")))?,
        );
        tracing::info!(tables = schema.total_tables(), "schema loaded");

        *self.schema_cache.write() = Some(schema.clone());
        Ok(schema)
    }

    /// Execute a free-form statement: validate, consult the cache, run,
    /// cap rows, cache when complete.
    pub fn execute(&self, sql: &str) -> QueryResult {
        if let Err(reason) = validate(sql) {
            tracing::warn!(reason = %reason, sql = %preview(sql), "query rejected");
            return QueryResult::failure(sql, reason);
        }

        if let Some(hit) = self.cached(sql) {
            tracing::debug!(sql = %preview(sql), "query cache hit");
            return hit;
        }

        match self.run_query(sql) {
            Ok(result) => {
                tracing::info!(
                    rows = result.returned_rows,
                    total = result.row_count,
                    truncated = result.truncated,
                    sql = %preview(sql),
                    "query executed"
                );
                // Truncated results are never cached: a looser row cap
                // later must not be served a stale truncated answer.
                if !result.truncated {
                    self.store(sql, &result);
                }
                result
            }
            Err(e) => {
                tracing::error!(error = %e, sql = %preview(sql), "query failed");
                QueryResult::failure(sql, e.to_string())
            }
        }
    }

    fn run_query(&self, sql: &str) -> rusqlite::Result<QueryResult> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query([])?;
        let mut fetched: Vec<Value> = Vec::new();
        let mut total: u64 = 0;
        while let Some(row) = rows.next()? {
            total += 1;
            if (fetched.len() as u64) < self.config.max_result_rows {
                let mut obj = serde_json::Map::with_capacity(columns.len());
                for (i, name) in columns.iter().enumerate() {
                    obj.insert(name.clone(), value_ref_to_json(row.get_ref(i)?));
                }
                fetched.push(Value::Object(obj));
            }
        }

        let returned = fetched.len() as u64;
        Ok(QueryResult {
            success: true,
            rows: fetched,
            row_count: total,
            returned_rows: returned,
            columns,
            truncated: returned < total,
            error: None,
            query: sql.to_string(),
        })
    }

    /// Run a statement with bound parameters, bypassing free-form
    /// validation (the SQL is ours, only the values vary).
    pub(crate) fn run_bound(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> QueryResult {
        match self.try_bound(sql, params) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, sql = %preview(sql), "bound query failed");
                QueryResult::failure(sql, e.to_string())
            }
        }
    }

    fn try_bound(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> rusqlite::Result<QueryResult> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query(params)?;
        let mut fetched: Vec<Value> = Vec::new();
        while let Some(row) = rows.next()? {
            let mut obj = serde_json::Map::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                obj.insert(name.clone(), value_ref_to_json(row.get_ref(i)?));
            }
            fetched.push(Value::Object(obj));
        }

        let count = fetched.len() as u64;
        Ok(QueryResult {
            success: true,
            rows: fetched,
            row_count: count,
            returned_rows: count,
            columns,
            truncated: false,
            error: None,
            query: sql.to_string(),
        })
    }

    // ── Query cache ──────────────────────────────────────────────────

    fn cached(&self, sql: &str) -> Option<QueryResult> {
        let key = cache_key(sql);
        let ttl = Duration::from_secs(self.config.query_cache_ttl_secs);
        let mut cache = self.query_cache.lock();
        match cache.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < ttl => Some(entry.result.clone()),
            Some(_) => {
                cache.remove(&key);
                None
            }
            None => None,
        }
    }

    fn store(&self, sql: &str, result: &QueryResult) {
        self.query_cache.lock().insert(
            cache_key(sql),
            CachedQuery { stored_at: Instant::now(), result: result.clone() },
        );
    }

    pub fn clear_query_cache(&self) {
        self.query_cache.lock().clear();
    }

    pub fn query_cache_stats(&self) -> CacheStats {
        let ttl = Duration::from_secs(self.config.query_cache_ttl_secs);
        let cache = self.query_cache.lock();
        let valid = cache.values().filter(|e| e.stored_at.elapsed() < ttl).count();
        CacheStats {
            total_entries: cache.len(),
            valid_entries: valid,
            expired_entries: cache.len() - valid,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} byte blob>", b.len())),
    }
}

fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cache_key(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_sql(sql).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn preview(sql: &str) -> String {
    let mut out: String = sql.chars().take(100).collect();
    if out.len() < sql.len() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::seeded_sandbox;

    #[test]
    fn select_returns_rows_as_objects() {
        let (_dir, sandbox) = seeded_sandbox(500);
        let result = sandbox.execute("SELECT id, vendor_name FROM invoices ORDER BY id");
        assert!(result.success);
        assert_eq!(result.row_count, 4);
        assert_eq!(result.returned_rows, 4);
        assert!(!result.truncated);
        assert_eq!(result.columns, vec!["id", "vendor_name"]);
        assert_eq!(result.rows[0]["vendor_name"], "Acme Corp");
    }

    #[test]
    fn rejected_query_is_a_structured_failure() {
        let (_dir, sandbox) = seeded_sandbox(500);
        let result = sandbox.execute("DELETE FROM invoices");
        assert!(!result.success);
        assert_eq!(result.row_count, 0);
        assert!(result.error.as_deref().unwrap().contains("DELETE"));
        // Rejections never enter the cache.
        assert_eq!(sandbox.query_cache_stats().total_entries, 0);
    }

    #[test]
    fn backend_error_is_a_structured_failure() {
        let (_dir, sandbox) = seeded_sandbox(500);
        let result = sandbox.execute("SELECT nope FROM missing_table");
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn oversized_result_is_truncated_and_not_cached() {
        let (_dir, sandbox) = seeded_sandbox(500);
        {
            let conn = sandbox.open().unwrap();
            let mut insert = conn
                .prepare(
                    "INSERT INTO invoices (invoice_number, invoice_date, vendor_name, \
                     total_cents, currency_code) VALUES (?1, '2024-06-01', 'Bulk Inc', 100, 'USD')",
                )
                .unwrap();
            for i in 0..600 {
                insert.execute([format!("BULK-{i:04}")]).unwrap();
            }
        }

        let result = sandbox.execute("SELECT * FROM invoices WHERE vendor_name = 'Bulk Inc'");
        assert!(result.success);
        assert_eq!(result.row_count, 600);
        assert_eq!(result.returned_rows, 500);
        assert!(result.truncated);
        assert_eq!(result.rows.len(), 500);
        assert_eq!(sandbox.query_cache_stats().total_entries, 0);
    }

    #[test]
    fn complete_result_is_cached_and_served_again() {
        let (_dir, sandbox) = seeded_sandbox(500);
        let first = sandbox.execute("SELECT COUNT(*) AS n FROM invoices");
        assert!(first.success);
        assert_eq!(sandbox.query_cache_stats().valid_entries, 1);

        // Whitespace-normalized key: a reformatted statement hits the
        // same entry.
        let second = sandbox.execute("SELECT   COUNT(*) AS n\nFROM invoices");
        assert_eq!(second.rows, first.rows);
        assert_eq!(sandbox.query_cache_stats().total_entries, 1);
    }

    #[test]
    fn null_values_map_to_json_null() {
        let (_dir, sandbox) = seeded_sandbox(500);
        let result = sandbox.execute("SELECT path FROM invoices WHERE id = 1");
        assert_eq!(result.rows[0]["path"], Value::Null);
    }

    #[test]
    fn clear_query_cache_empties_it() {
        let (_dir, sandbox) = seeded_sandbox(500);
        sandbox.execute("SELECT 1 AS one");
        assert_eq!(sandbox.query_cache_stats().total_entries, 1);
        sandbox.clear_query_cache();
        assert_eq!(sandbox.query_cache_stats().total_entries, 0);
    }
}
