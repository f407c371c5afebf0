//! Fixed tool catalog and dispatcher.
//!
//! Every operation the planner may reference lives here: the free-form
//! (validated) SQL escape hatch, schema introspection, and the
//! parameterized high-level lookups.  String arguments interpolated into
//! SQL are escaped by doubling single quotes; `get_vendor_invoices` and
//! `get_invoice_items_by_doc_id` use bound parameters instead.

use std::sync::Arc;

use serde_json::{json, Value};

use ia_domain::chat::ToolDefinition;

use crate::query::{QueryResult, SqliteSandbox};
use crate::schema::SchemaInfo;

/// Name of the free-form SQL tool.
pub const EXECUTE_SQL: &str = "execute_sql_query";
/// Name of the schema-introspection tool.
pub const GET_SCHEMA: &str = "get_database_schema";

/// What a tool call produced.
pub enum ToolReply {
    Query(QueryResult),
    Schema(Arc<SchemaInfo>),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl SqliteSandbox {
    /// Dispatch a tool call by name.  Unknown tools and missing required
    /// arguments come back as structured failures, never panics.
    pub fn call_tool(&self, name: &str, args: &Value) -> ToolReply {
        tracing::info!(tool = name, args = %args, "tool call");
        match name {
            EXECUTE_SQL => match args.get("sql").and_then(Value::as_str) {
                Some(sql) => ToolReply::Query(self.execute(sql)),
                None => missing_arg("sql"),
            },
            GET_SCHEMA => match self.schema() {
                Ok(schema) => ToolReply::Schema(schema),
                Err(e) => ToolReply::Query(QueryResult::failure("", e.to_string())),
            },
            "get_invoice_by_id" => match int_arg(args, "doc_id") {
                Some(doc_id) => ToolReply::Query(self.invoice_by_id(doc_id)),
                None => missing_arg("doc_id"),
            },
            "search_invoices_by_vendor" => match str_arg(args, "vendor_name") {
                Some(vendor) => ToolReply::Query(
                    self.search_invoices_by_vendor(vendor, int_arg(args, "limit").unwrap_or(10)),
                ),
                None => missing_arg("vendor_name"),
            },
            "get_top_vendors" => {
                ToolReply::Query(self.top_vendors(int_arg(args, "limit").unwrap_or(10)))
            }
            "search_by_text" => match str_arg(args, "search_term") {
                Some(term) => ToolReply::Query(
                    self.search_by_text(term, int_arg(args, "limit").unwrap_or(20)),
                ),
                None => missing_arg("search_term"),
            },
            "get_invoices_by_date_range" => {
                match (str_arg(args, "start_date"), str_arg(args, "end_date")) {
                    (Some(start), Some(end)) => ToolReply::Query(self.invoices_by_date_range(
                        start,
                        end,
                        int_arg(args, "limit").unwrap_or(100),
                    )),
                    (None, _) => missing_arg("start_date"),
                    (_, None) => missing_arg("end_date"),
                }
            }
            "get_most_expensive_item" => ToolReply::Query(self.most_expensive_item()),
            "get_top_categories_by_spend" => ToolReply::Query(self.top_categories_by_spend(
                int_arg(args, "limit").unwrap_or(10),
                int_arg(args, "offset").unwrap_or(0),
            )),
            "get_pricey_categories_by_unit" => ToolReply::Query(self.pricey_categories_by_unit(
                int_arg(args, "limit").unwrap_or(10),
                int_arg(args, "offset").unwrap_or(0),
            )),
            "get_recent_invoices" => ToolReply::Query(self.recent_invoices(
                int_arg(args, "limit").unwrap_or(10),
                int_arg(args, "offset").unwrap_or(0),
            )),
            "get_vendor_invoices" => match str_arg(args, "vendor_name") {
                Some(vendor) => ToolReply::Query(self.vendor_invoices(
                    vendor,
                    int_arg(args, "limit").unwrap_or(20),
                    int_arg(args, "offset").unwrap_or(0),
                )),
                None => missing_arg("vendor_name"),
            },
            "get_invoice_items_by_doc_id" => match int_arg(args, "doc_id") {
                Some(doc_id) => ToolReply::Query(self.invoice_items_by_doc_id(doc_id)),
                None => missing_arg("doc_id"),
            },
            "get_total_invoices_summary" => ToolReply::Query(self.total_invoices_summary()),
            "get_max_invoice" => ToolReply::Query(self.max_invoice()),
            _ => ToolReply::Query(QueryResult::failure("", format!("unknown tool: {name}"))),
        }
    }
}

fn missing_arg(name: &str) -> ToolReply {
    ToolReply::Query(QueryResult::failure("", format!("missing required argument `{name}`")))
}

fn str_arg<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

fn int_arg(args: &Value, name: &str) -> Option<i64> {
    args.get(name).and_then(Value::as_i64)
}

/// Escape a string for interpolation into a single-quoted SQL literal.
fn escape(text: &str) -> String {
    text.replace('\'', "''")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// High-level operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl SqliteSandbox {
    fn invoice_by_id(&self, doc_id: i64) -> QueryResult {
        let sql = format!(
            "SELECT d.*, GROUP_CONCAT(json_object(\
             'idx', i.idx, 'description', i.description, 'qty', i.qty, \
             'unit_price_cents', i.unit_price_cents, \
             'line_total_cents', i.line_total_cents, 'category', i.category)) AS items_json \
             FROM invoices d \
             LEFT JOIN items i ON d.id = i.document_id \
             WHERE d.id = {doc_id} \
             GROUP BY d.id"
        );
        self.execute(&sql)
    }

    fn search_invoices_by_vendor(&self, vendor_name: &str, limit: i64) -> QueryResult {
        let sql = format!(
            "SELECT id, invoice_number, invoice_date, vendor_name, total_cents, \
             currency_code, path \
             FROM invoices \
             WHERE vendor_name LIKE '%{}%' \
             ORDER BY invoice_date DESC \
             LIMIT {limit}",
            escape(vendor_name)
        );
        self.execute(&sql)
    }

    /// Top vendors by total spend.  Grouped by vendor only; the currency
    /// list is aggregated so mixed-currency vendors stay visible.
    fn top_vendors(&self, limit: i64) -> QueryResult {
        let sql = format!(
            "SELECT vendor_name, COUNT(*) AS invoice_count, \
             SUM(total_cents) AS total_spent_cents, \
             GROUP_CONCAT(DISTINCT currency_code) AS currencies, \
             MAX(invoice_date) AS last_invoice_date \
             FROM invoices \
             GROUP BY vendor_name \
             ORDER BY total_spent_cents DESC \
             LIMIT {limit}"
        );
        self.execute(&sql)
    }

    fn search_by_text(&self, search_term: &str, limit: i64) -> QueryResult {
        let sql = format!(
            "SELECT id, invoice_number, vendor_name, invoice_date, total_cents, \
             currency_code, substr(raw_text, 1, 200) AS text_preview \
             FROM invoices \
             WHERE raw_text LIKE '%{}%' \
             ORDER BY invoice_date DESC \
             LIMIT {limit}",
            escape(search_term)
        );
        self.execute(&sql)
    }

    fn invoices_by_date_range(&self, start_date: &str, end_date: &str, limit: i64) -> QueryResult {
        let sql = format!(
            "SELECT id, invoice_number, vendor_name, invoice_date, total_cents, currency_code \
             FROM invoices \
             WHERE invoice_date BETWEEN '{}' AND '{}' \
             ORDER BY invoice_date DESC \
             LIMIT {limit}",
            escape(start_date),
            escape(end_date)
        );
        self.execute(&sql)
    }

    fn most_expensive_item(&self) -> QueryResult {
        self.execute(
            "SELECT i.id, i.description, i.qty, i.unit_price_cents, i.line_total_cents, \
             i.category, d.id AS document_id, d.invoice_number, d.invoice_date, \
             d.vendor_name, d.currency_code \
             FROM items i \
             JOIN invoices d ON d.id = i.document_id \
             ORDER BY i.line_total_cents DESC, COALESCE(i.unit_price_cents, 0) DESC, i.id DESC \
             LIMIT 1",
        )
    }

    fn top_categories_by_spend(&self, limit: i64, offset: i64) -> QueryResult {
        let sql = format!(
            "SELECT COALESCE(i.category, 'Uncategorized') AS category, \
             COUNT(*) AS items_count, SUM(i.line_total_cents) AS total_cents \
             FROM items i \
             GROUP BY category \
             ORDER BY total_cents DESC \
             LIMIT {limit} OFFSET {offset}"
        );
        self.execute(&sql)
    }

    fn pricey_categories_by_unit(&self, limit: i64, offset: i64) -> QueryResult {
        let sql = format!(
            "SELECT COALESCE(category, 'Uncategorized') AS category, \
             AVG(COALESCE(unit_price_cents, 0)) AS avg_unit_price_cents, \
             COUNT(*) AS n_items \
             FROM items \
             WHERE unit_price_cents IS NOT NULL AND unit_price_cents > 0 \
             GROUP BY category \
             HAVING n_items >= 3 \
             ORDER BY avg_unit_price_cents DESC \
             LIMIT {limit} OFFSET {offset}"
        );
        self.execute(&sql)
    }

    fn recent_invoices(&self, limit: i64, offset: i64) -> QueryResult {
        let sql = format!(
            "SELECT id, invoice_number, vendor_name, invoice_date, total_cents, currency_code \
             FROM invoices \
             ORDER BY invoice_date DESC, id DESC \
             LIMIT {limit} OFFSET {offset}"
        );
        self.execute(&sql)
    }

    fn vendor_invoices(&self, vendor_name: &str, limit: i64, offset: i64) -> QueryResult {
        let pattern = format!("%{vendor_name}%");
        self.run_bound(
            "SELECT id, invoice_number, vendor_name, invoice_date, total_cents, currency_code \
             FROM invoices \
             WHERE vendor_name LIKE ?1 \
             ORDER BY invoice_date DESC \
             LIMIT ?2 OFFSET ?3",
            &[&pattern as &dyn rusqlite::ToSql, &limit, &offset],
        )
    }

    fn invoice_items_by_doc_id(&self, doc_id: i64) -> QueryResult {
        self.run_bound(
            "SELECT i.idx, i.description, i.qty, i.unit_price_cents, i.line_total_cents, \
             i.category \
             FROM items i \
             WHERE i.document_id = ?1 \
             ORDER BY i.idx",
            &[&doc_id as &dyn rusqlite::ToSql],
        )
    }

    /// Totals grouped by currency; amounts in different currencies are
    /// never summed together.
    fn total_invoices_summary(&self) -> QueryResult {
        self.execute(
            "SELECT COUNT(*) AS total_invoices, currency_code, SUM(total_cents) AS total_cents \
             FROM invoices \
             GROUP BY currency_code \
             ORDER BY total_cents DESC",
        )
    }

    fn max_invoice(&self) -> QueryResult {
        self.execute(
            "SELECT id, invoice_number, invoice_date, vendor_name, total_cents, \
             currency_code, path \
             FROM invoices \
             ORDER BY total_cents DESC, id DESC \
             LIMIT 1",
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn tool(name: &str, description: &str, parameters: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        description: description.into(),
        parameters,
    }
}

fn no_params() -> Value {
    json!({"type": "object", "properties": {}})
}

fn paging_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "limit": {"type": "integer", "description": "Maximum number of results", "default": 10},
            "offset": {"type": "integer", "description": "Number of results to skip", "default": 0},
        },
    })
}

/// The full catalog exposed to the planner model.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        tool(
            EXECUTE_SQL,
            "Execute a read-only SQL query (SELECT, PRAGMA, EXPLAIN) against the SQLite \
             invoices database. Use this when no specialized tool covers the question.",
            json!({
                "type": "object",
                "properties": {
                    "sql": {"type": "string", "description": "SQL query to execute (SELECT/PRAGMA/EXPLAIN only)"},
                },
                "required": ["sql"],
            }),
        ),
        tool(
            GET_SCHEMA,
            "Get the complete database schema (tables, columns, types, relationships).",
            no_params(),
        ),
        tool(
            "get_invoice_by_id",
            "Get a specific invoice by ID, including all its line items.",
            json!({
                "type": "object",
                "properties": {
                    "doc_id": {"type": "integer", "description": "Document/invoice ID"},
                },
                "required": ["doc_id"],
            }),
        ),
        tool(
            "search_invoices_by_vendor",
            "Search invoices from a specific vendor (partial name matching).",
            json!({
                "type": "object",
                "properties": {
                    "vendor_name": {"type": "string", "description": "Vendor name or part of it"},
                    "limit": {"type": "integer", "description": "Maximum number of results", "default": 10},
                },
                "required": ["vendor_name"],
            }),
        ),
        tool(
            "get_top_vendors",
            "Get vendors with the highest total spending, sorted descending.",
            json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "description": "Number of vendors to return", "default": 10},
                },
            }),
        ),
        tool(
            "search_by_text",
            "Search invoices containing a specific term in their extracted raw text.",
            json!({
                "type": "object",
                "properties": {
                    "search_term": {"type": "string", "description": "Term to search for"},
                    "limit": {"type": "integer", "description": "Maximum number of results", "default": 20},
                },
                "required": ["search_term"],
            }),
        ),
        tool(
            "get_invoices_by_date_range",
            "Get invoices within a date range (ISO format: YYYY-MM-DD).",
            json!({
                "type": "object",
                "properties": {
                    "start_date": {"type": "string", "description": "Start date (YYYY-MM-DD)"},
                    "end_date": {"type": "string", "description": "End date (YYYY-MM-DD)"},
                    "limit": {"type": "integer", "description": "Maximum number of results", "default": 100},
                },
                "required": ["start_date", "end_date"],
            }),
        ),
        tool(
            "get_most_expensive_item",
            "Get the single most expensive line item across all invoices.",
            no_params(),
        ),
        tool(
            "get_top_categories_by_spend",
            "Get categories with the highest total spending, sorted descending. \
             Supports pagination for 'second category', etc.",
            paging_params(),
        ),
        tool(
            "get_pricey_categories_by_unit",
            "Get categories with the highest average unit price. Supports pagination.",
            paging_params(),
        ),
        tool(
            "get_recent_invoices",
            "Get the most recent invoices by date, sorted descending. Supports pagination.",
            paging_params(),
        ),
        tool(
            "get_vendor_invoices",
            "Get invoices from a specific vendor with pagination support.",
            json!({
                "type": "object",
                "properties": {
                    "vendor_name": {"type": "string", "description": "Vendor name or partial name"},
                    "limit": {"type": "integer", "description": "Number of invoices to return", "default": 20},
                    "offset": {"type": "integer", "description": "Number of invoices to skip", "default": 0},
                },
                "required": ["vendor_name"],
            }),
        ),
        tool(
            "get_invoice_items_by_doc_id",
            "Get all line items for a specific invoice/document ID.",
            json!({
                "type": "object",
                "properties": {
                    "doc_id": {"type": "integer", "description": "Document/invoice ID"},
                },
                "required": ["doc_id"],
            }),
        ),
        tool(
            "get_total_invoices_summary",
            "Get a summary of all invoices: total count and amounts grouped by currency. \
             Use for questions about overall totals.",
            no_params(),
        ),
        tool(
            "get_max_invoice",
            "Get the invoice with the highest total amount. Use for questions about the \
             most expensive or largest invoice.",
            no_params(),
        ),
    ]
}
