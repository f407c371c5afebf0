//! Post-execution analysis and corrective feedback.
//!
//! Inspects the free-form SQL runs of an executed plan and classifies
//! what went wrong: a failed or rejected query is a retryable issue, a
//! data-needing plan that ran no SQL at all is a retryable issue, and a
//! successful zero-row query is a soft issue (it only shapes the
//! feedback, it is not a hard failure).  The feedback sent back to the
//! planner stays small: the failing SQL, the sandbox error, and a schema
//! snippet limited to the tables the query referenced.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use ia_domain::plan::{Plan, ToolRun};
use ia_sandbox::{SchemaInfo, EXECUTE_SQL};

const SNIPPET_COLUMNS: usize = 8;
const SNIPPET_TABLES: usize = 8;

/// What the analysis found wrong with an executed plan.
#[derive(Debug, Clone)]
pub struct ExecutionIssue {
    pub error: String,
    pub sql: String,
    pub tables: BTreeSet<String>,
    pub zero_rows: bool,
}

/// Inspect tool runs for retryable problems.  `None` means the plan is
/// good enough to summarize.
pub fn analyze(plan: &Plan, runs: &[ToolRun]) -> Option<ExecutionIssue> {
    if !plan.needs_data {
        return None;
    }

    let mut ran_sql = false;
    for run in runs {
        if run.tool != EXECUTE_SQL {
            continue;
        }
        ran_sql = true;

        let sql = run
            .arguments
            .get("sql")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
            .to_string();

        let error = run.summary.error.clone().or_else(|| run.error.clone());
        if !run.summary.success || error.is_some() {
            return Some(ExecutionIssue {
                error: error.unwrap_or_else(|| "the query was rejected by the validator".into()),
                tables: extract_table_names(&sql),
                sql,
                zero_rows: false,
            });
        }

        if run.summary.row_count == Some(0) {
            return Some(ExecutionIssue {
                error: "the query returned zero rows".into(),
                tables: extract_table_names(&sql),
                sql,
                zero_rows: true,
            });
        }
    }

    if !ran_sql {
        return Some(ExecutionIssue {
            error: "the plan did not execute any SQL query".into(),
            sql: String::new(),
            tables: BTreeSet::new(),
            zero_rows: false,
        });
    }

    None
}

/// Tables referenced by FROM/JOIN clauses, lowercased.
pub fn extract_table_names(sql: &str) -> BTreeSet<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());
    pattern
        .captures_iter(sql)
        .map(|captures| captures[1].to_lowercase())
        .collect()
}

/// Corrective feedback for the next planning attempt.
pub fn retry_feedback(issue: &ExecutionIssue, schema: &SchemaInfo) -> String {
    let sql = if issue.sql.is_empty() { "(no SQL was executed)" } else { issue.sql.as_str() };
    let mut parts = vec![
        "The previous attempt failed while executing the proposed SQL query.".to_string(),
        format!("Sandbox error message: {}", issue.error),
        "SQL that was sent:".to_string(),
        format!("```sql\n{sql}\n```"),
        "Relevant schema snippet:".to_string(),
        schema_snippet(&issue.tables, schema),
    ];
    if issue.zero_rows {
        parts.push(
            "The query returned zero rows. Double-check table names, joins, and filters \
             before proposing the next SQL statement."
                .to_string(),
        );
    }
    parts.push(
        "Produce a new plan that uses the required tools (including get_database_schema \
         when unsure) and a valid SQL query that follows all rules."
            .to_string(),
    );
    parts.join("\n")
}

/// Schema lines for the referenced tables, falling back to the table-name
/// summary when none of them exist.
fn schema_snippet(table_names: &BTreeSet<String>, schema: &SchemaInfo) -> String {
    let mut lines = Vec::new();
    for name in table_names {
        let Some(info) = schema.tables.get(name) else {
            continue;
        };
        let mut columns: Vec<&str> =
            info.columns.iter().take(SNIPPET_COLUMNS).map(|c| c.name.as_str()).collect();
        if info.columns.len() > SNIPPET_COLUMNS {
            columns.push("…");
        }
        lines.push(format!("- {name}: {}", columns.join(", ")));
    }

    if lines.is_empty() {
        let names = schema.table_names();
        if names.is_empty() {
            return "Schema information was not available.".to_string();
        }
        let preview = names.iter().take(SNIPPET_TABLES).cloned().collect::<Vec<_>>().join(", ");
        let suffix = if names.len() > SNIPPET_TABLES { "…" } else { "" };
        return format!("Schema tables detected: {preview}{suffix}");
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use ia_domain::plan::{PlanStep, RunDigest};

    fn data_plan() -> Plan {
        Plan {
            needs_data: true,
            steps: vec![PlanStep {
                id: "step1".into(),
                tool: EXECUTE_SQL.into(),
                description: String::new(),
                arguments: json!({"sql": "SELECT * FROM invoices"}),
            }],
            notes: None,
        }
    }

    fn sql_run(success: bool, row_count: u64, error: Option<&str>) -> ToolRun {
        ToolRun {
            step_id: "step1".into(),
            tool: EXECUTE_SQL.into(),
            arguments: json!({"sql": "SELECT * FROM invoices JOIN items ON 1=1"}),
            summary: RunDigest {
                tool: EXECUTE_SQL.into(),
                success,
                row_count: Some(row_count),
                error: error.map(String::from),
                ..Default::default()
            },
            raw: serde_json::Value::Null,
            error: None,
        }
    }

    #[test]
    fn no_data_plan_is_never_an_issue() {
        let plan = Plan::empty(None);
        assert!(analyze(&plan, &[]).is_none());
    }

    #[test]
    fn failed_sql_is_a_hard_issue() {
        let issue =
            analyze(&data_plan(), &[sql_run(false, 0, Some("no such table: invoice"))]).unwrap();
        assert!(!issue.zero_rows);
        assert_eq!(issue.error, "no such table: invoice");
        assert!(issue.tables.contains("invoices"));
        assert!(issue.tables.contains("items"));
    }

    #[test]
    fn zero_rows_is_a_soft_issue() {
        let issue = analyze(&data_plan(), &[sql_run(true, 0, None)]).unwrap();
        assert!(issue.zero_rows);
        assert!(issue.error.contains("zero rows"));
    }

    #[test]
    fn successful_rows_are_clean() {
        assert!(analyze(&data_plan(), &[sql_run(true, 3, None)]).is_none());
    }

    #[test]
    fn data_plan_without_sql_step_is_an_issue() {
        let runs = vec![ToolRun {
            step_id: "step1".into(),
            tool: "get_database_schema".into(),
            arguments: json!({}),
            summary: RunDigest {
                tool: "get_database_schema".into(),
                success: true,
                ..Default::default()
            },
            raw: serde_json::Value::Null,
            error: None,
        }];
        let issue = analyze(&data_plan(), &runs).unwrap();
        assert!(issue.error.contains("did not execute any SQL"));
        assert!(issue.sql.is_empty());
    }

    #[test]
    fn table_extraction_handles_joins_case_insensitively() {
        let tables =
            extract_table_names("select * from Invoices i join ITEMS t on t.document_id = i.id");
        assert_eq!(tables.into_iter().collect::<Vec<_>>(), vec!["invoices", "items"]);
    }

    #[test]
    fn feedback_mentions_zero_rows_for_soft_issues() {
        let schema = SchemaInfo { tables: Default::default() };
        let issue = analyze(&data_plan(), &[sql_run(true, 0, None)]).unwrap();
        let feedback = retry_feedback(&issue, &schema);
        assert!(feedback.contains("zero rows"));
        assert!(feedback.contains("```sql"));
    }
}
