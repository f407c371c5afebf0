//! Result digesting: compact, truncation-aware summaries of tool
//! results, and the plan/result fingerprint stored with cached answers.
//!
//! Aggregate-shaped results (few, mostly-numeric columns or
//! aggregate-style column names) are information-dense and cheap to show
//! in full, so they get a higher row threshold than detailed listings;
//! anything over its threshold carries an explicit omitted-row count.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use ia_domain::config::AssistantConfig;
use ia_domain::plan::{Plan, RunDigest, ToolRun};
use ia_sandbox::{QueryResult, ToolReply};

const AGGREGATE_TOKENS: &[&str] = &["count", "sum", "avg", "max", "min", "total", "average"];
const SCHEMA_TABLES_SHOWN: usize = 8;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Digesting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the compact summary for one tool reply.
pub fn digest_reply(tool: &str, reply: &ToolReply, cfg: &AssistantConfig) -> RunDigest {
    match reply {
        ToolReply::Schema(schema) => RunDigest {
            tool: tool.to_string(),
            success: true,
            schema_tables: schema
                .table_names()
                .into_iter()
                .take(SCHEMA_TABLES_SHOWN)
                .map(String::from)
                .collect(),
            schema_total_tables: Some(schema.total_tables()),
            ..Default::default()
        },
        ToolReply::Query(result) => digest_query(tool, result, cfg),
    }
}

fn digest_query(tool: &str, result: &QueryResult, cfg: &AssistantConfig) -> RunDigest {
    let mut digest = RunDigest {
        tool: tool.to_string(),
        success: result.success,
        row_count: Some(result.row_count),
        returned_rows: Some(result.returned_rows),
        columns: result.columns.clone(),
        error: result.error.clone(),
        query: Some(result.query.clone()),
        truncated: result.truncated,
        ..Default::default()
    };

    if result.rows.is_empty() {
        return digest;
    }

    let max_rows = if is_aggregate(&result.columns, &result.rows) {
        cfg.aggregate_digest_rows
    } else {
        cfg.max_digest_rows
    };

    let shown: Vec<Value> =
        result.rows.iter().take(max_rows).map(|row| clip_row(row, cfg.max_cell_chars)).collect();

    if result.rows.len() > shown.len() {
        digest.omitted_rows = Some((result.rows.len() - shown.len()) as u64);
        digest.complete_result = Some(false);
    } else {
        // Complete only when nothing was capped upstream either.
        digest.complete_result = Some(!result.truncated);
    }
    digest.sample_rows = Some(shown);
    digest
}

/// Heuristic: does this result look like an aggregation rather than a
/// detailed listing?
fn is_aggregate(columns: &[String], rows: &[Value]) -> bool {
    if columns.is_empty() || rows.is_empty() {
        return false;
    }

    let has_aggregate_column = columns.iter().any(|c| {
        let lower = c.to_lowercase();
        AGGREGATE_TOKENS.iter().any(|token| lower.contains(token))
    });

    if columns.len() <= 5 {
        if let Some(first) = rows.first().and_then(Value::as_object) {
            let numeric = first.values().filter(|v| v.is_number()).count();
            let mostly_numeric = numeric * 2 >= first.len();
            return has_aggregate_column || mostly_numeric;
        }
    }

    has_aggregate_column
}

fn clip_row(row: &Value, max_cell_chars: usize) -> Value {
    let Some(obj) = row.as_object() else {
        return row.clone();
    };
    let clipped = obj
        .iter()
        .map(|(key, value)| (key.clone(), clip_cell(value, max_cell_chars)))
        .collect();
    Value::Object(clipped)
}

fn clip_cell(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::String(text) if text.chars().count() > max_chars => {
            let mut clipped: String = text.chars().take(max_chars).collect();
            clipped.push('…');
            Value::String(clipped)
        }
        other => other.clone(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fingerprint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Derived key over a plan and its results, used to detect whether a
/// cached answer is still representative without comparing payloads.
pub fn fingerprint(plan: &Plan, runs: &[ToolRun]) -> String {
    let payload = json!({
        "plan": plan.steps,
        "results": runs
            .iter()
            .map(|run| {
                json!({
                    "tool": run.tool,
                    "query": run.summary.query,
                    "row_count": run.summary.row_count,
                })
            })
            .collect::<Vec<_>>(),
    });
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ia_domain::plan::PlanStep;

    fn listing_result(rows: usize, columns: usize) -> QueryResult {
        let columns: Vec<String> = (0..columns).map(|i| format!("field_{i}")).collect();
        let rows = (0..rows)
            .map(|i| {
                let mut obj = serde_json::Map::new();
                for c in &columns {
                    obj.insert(c.clone(), Value::String(format!("value {i}")));
                }
                Value::Object(obj)
            })
            .collect();
        QueryResult {
            success: true,
            row_count: 0,
            returned_rows: 0,
            columns,
            truncated: false,
            error: None,
            query: "SELECT ...".into(),
            rows,
        }
    }

    fn config() -> AssistantConfig {
        AssistantConfig::default()
    }

    #[test]
    fn aggregate_detected_by_column_name() {
        let columns = vec!["vendor_name".to_string(), "total_spent_cents".to_string()];
        let rows = vec![json!({"vendor_name": "Acme", "total_spent_cents": "435000"})];
        assert!(is_aggregate(&columns, &rows));
    }

    #[test]
    fn aggregate_detected_by_numeric_shape() {
        let columns = vec!["a".to_string(), "b".to_string()];
        let rows = vec![json!({"a": 1, "b": 2})];
        assert!(is_aggregate(&columns, &rows));
    }

    #[test]
    fn wide_text_listing_is_not_aggregate() {
        let result = listing_result(3, 8);
        assert!(!is_aggregate(&result.columns, &result.rows));
    }

    #[test]
    fn small_listing_is_complete() {
        let mut result = listing_result(10, 8);
        result.row_count = 10;
        result.returned_rows = 10;
        let digest = digest_query("execute_sql_query", &result, &config());
        assert_eq!(digest.complete_result, Some(true));
        assert!(digest.omitted_rows.is_none());
        assert_eq!(digest.sample_rows.unwrap().len(), 10);
    }

    #[test]
    fn large_listing_reports_omitted_rows() {
        let mut result = listing_result(80, 8);
        result.row_count = 80;
        result.returned_rows = 80;
        let digest = digest_query("execute_sql_query", &result, &config());
        assert_eq!(digest.complete_result, Some(false));
        assert_eq!(digest.omitted_rows, Some(60));
        assert_eq!(digest.sample_rows.unwrap().len(), 20);
    }

    #[test]
    fn aggregates_get_the_higher_row_threshold() {
        // 30 rows: over the listing cap, under the aggregate cap.
        let columns = vec!["category".to_string(), "total_cents".to_string()];
        let rows: Vec<Value> = (0..30)
            .map(|i| json!({"category": format!("cat {i}"), "total_cents": i * 100}))
            .collect();
        let result = QueryResult {
            success: true,
            row_count: 30,
            returned_rows: 30,
            columns,
            truncated: false,
            error: None,
            query: "SELECT ...".into(),
            rows,
        };
        let digest = digest_query("execute_sql_query", &result, &config());
        assert_eq!(digest.complete_result, Some(true));
        assert_eq!(digest.sample_rows.unwrap().len(), 30);
    }

    #[test]
    fn upstream_truncation_is_never_reported_complete() {
        let mut result = listing_result(10, 8);
        result.row_count = 600;
        result.returned_rows = 10;
        result.truncated = true;
        let digest = digest_query("execute_sql_query", &result, &config());
        assert_eq!(digest.complete_result, Some(false));
        assert!(digest.truncated);
    }

    #[test]
    fn long_cells_are_clipped_with_ellipsis() {
        let clipped = clip_cell(&Value::String("x".repeat(300)), 180);
        let text = clipped.as_str().unwrap();
        assert_eq!(text.chars().count(), 181);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn fingerprint_tracks_plan_and_row_counts() {
        let plan = Plan {
            needs_data: true,
            steps: vec![PlanStep {
                id: "step1".into(),
                tool: "execute_sql_query".into(),
                description: String::new(),
                arguments: json!({"sql": "SELECT 1"}),
            }],
            notes: None,
        };
        let run = ToolRun {
            step_id: "step1".into(),
            tool: "execute_sql_query".into(),
            arguments: json!({"sql": "SELECT 1"}),
            summary: RunDigest {
                tool: "execute_sql_query".into(),
                success: true,
                row_count: Some(4),
                query: Some("SELECT 1".into()),
                ..Default::default()
            },
            raw: Value::Null,
            error: None,
        };

        let a = fingerprint(&plan, &[run.clone()]);
        let b = fingerprint(&plan, &[run.clone()]);
        assert_eq!(a, b);

        let mut changed = run;
        changed.summary.row_count = Some(5);
        assert_ne!(a, fingerprint(&plan, &[changed]));
    }
}
