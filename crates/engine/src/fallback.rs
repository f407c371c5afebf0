//! Deterministic fallback planner.
//!
//! Maps common question shapes onto catalog tools via keyword matching,
//! with no model call involved.  Used when the model-driven planner keeps
//! failing or declines to fetch data for a question that clearly wants
//! some.  Every produced plan starts with a schema-inspection step.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use ia_domain::plan::{Plan, PlanStep};
use ia_sandbox::{EXECUTE_SQL, GET_SCHEMA};

fn contains_any(haystack: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| haystack.contains(p))
}

fn invoice_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(?:invoice|document|id)\s+#?(\d+)\b").unwrap())
}

struct PlanBuilder {
    steps: Vec<PlanStep>,
}

impl PlanBuilder {
    fn new() -> Self {
        Self { steps: Vec::new() }
    }

    fn add_tool(&mut self, tool: &str, description: &str, arguments: Value) {
        self.steps.push(PlanStep {
            id: format!("fallback_step{}", self.steps.len() + 1),
            tool: tool.to_string(),
            description: description.to_string(),
            arguments,
        });
    }

    fn add_sql(&mut self, sql: &str, description: &str) {
        self.add_tool(EXECUTE_SQL, description, json!({ "sql": sql }));
    }

    fn build(mut self) -> Option<Plan> {
        if self.steps.is_empty() {
            return None;
        }
        self.steps.insert(
            0,
            PlanStep {
                id: "fallback_step0".into(),
                tool: GET_SCHEMA.into(),
                description: "Inspect the SQLite schema before reading data".into(),
                arguments: json!({}),
            },
        );
        Some(Plan {
            needs_data: true,
            steps: self.steps,
            notes: Some("Plan produced by heuristic fallback.".into()),
        })
    }
}

/// Build a deterministic plan for a recognized question shape, or `None`
/// when no pattern matches.
pub fn fallback_plan(question: &str) -> Option<Plan> {
    let normalized = question.to_lowercase();
    let mut builder = PlanBuilder::new();

    if contains_any(
        &normalized,
        &["how many invoices", "number of invoices", "invoice count", "count of invoices"],
    ) {
        builder.add_sql(
            "SELECT COUNT(*) AS total_invoices FROM invoices;",
            "Count how many invoices are stored",
        );
    }

    if contains_any(
        &normalized,
        &[
            "most recent invoices",
            "latest invoices",
            "recent invoices",
            "newest invoices",
            "latest invoice",
            "newest invoice",
            "most recent invoice",
        ],
    ) {
        builder.add_tool(
            "get_recent_invoices",
            "Get the most recent invoices",
            json!({"limit": 5, "offset": 0}),
        );
    }

    if contains_any(&normalized, &["first invoice", "earliest invoice", "oldest invoice"]) {
        builder.add_sql(
            "SELECT id, invoice_number, invoice_date, vendor_name, total_cents, currency_code \
             FROM invoices ORDER BY invoice_date ASC, id ASC LIMIT 1;",
            "Retrieve the earliest invoice in the database",
        );
    }

    if let Some(captures) = invoice_id_pattern().captures(&normalized) {
        if let Ok(doc_id) = captures[1].parse::<i64>() {
            builder.add_tool(
                "get_invoice_by_id",
                &format!("Retrieve invoice with ID {doc_id}"),
                json!({"doc_id": doc_id}),
            );
        }
    }

    if contains_any(
        &normalized,
        &[
            "top vendors",
            "main vendors",
            "biggest vendors",
            "best vendors",
            "highest spending vendor",
            "spend by vendor",
            "all vendors",
        ],
    ) {
        // Default shows the full ranking; explicit top-N narrows it.
        let limit = if contains_any(&normalized, &["top 3", "top 5"]) {
            5
        } else if normalized.contains("top 10") {
            10
        } else {
            100
        };
        builder.add_tool(
            "get_top_vendors",
            &format!("Retrieve the top {limit} vendors by total spending"),
            json!({"limit": limit}),
        );
    }

    if contains_any(
        &normalized,
        &[
            "most expensive invoice",
            "largest invoice",
            "biggest invoice",
            "highest invoice",
            "invoice with the highest amount",
        ],
    ) {
        builder.add_tool(
            "get_max_invoice",
            "Retrieve the invoice with the highest total amount",
            json!({}),
        );
    }

    if contains_any(
        &normalized,
        &[
            "most expensive item",
            "most expensive line item",
            "most expensive product",
            "priciest item",
        ],
    ) {
        builder.add_tool(
            "get_most_expensive_item",
            "Get the single most expensive line item",
            json!({}),
        );
    }

    if contains_any(
        &normalized,
        &[
            "top categories",
            "categories by spend",
            "category with the most spend",
            "highest spending category",
            "second category",
            "third category",
            "fourth category",
        ],
    ) {
        let offset = if normalized.contains("second") {
            1
        } else if normalized.contains("third") {
            2
        } else if normalized.contains("fourth") {
            3
        } else {
            0
        };
        builder.add_tool(
            "get_top_categories_by_spend",
            &format!("Get top categories by spending (offset={offset})"),
            json!({"limit": 10, "offset": offset}),
        );
    }

    if contains_any(
        &normalized,
        &[
            "total amount",
            "sum of all invoices",
            "total spend",
            "grand total",
            "overall total",
            "spent in total",
        ],
    ) {
        builder.add_tool(
            "get_total_invoices_summary",
            "Get total count and amounts by currency for all invoices",
            json!({}),
        );
    }

    builder.build()
}
