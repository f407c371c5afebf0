//! Summary prompt construction.
//!
//! The summarizer model sees the executed plan and per-run digests, not
//! raw result sets.  The digest lines carry explicit completeness flags
//! so the model can be held to them by the system prompt.

use ia_domain::chat::Message;
use ia_domain::plan::{Plan, ToolRun};
use ia_sandbox::GET_SCHEMA;

/// System prompt for the summarization pass.
pub const SUMMARY_SYSTEM_PROMPT: &str = r#"You are an assistant that writes concise conclusions based solely on the
structured digest provided. Reply in 3-6 sentences, cite key values with their
units or currency, and warn if information is missing.

CRITICAL RULES FOR ACCURACY:
- If row_count=0, clearly state that no data was found for the query.
- If complete_result=true in the digest, present ALL data without mentioning truncation.
- If complete_result=false and omitted_rows > 0, mention how many total results exist.

CURRENCY HANDLING (MANDATORY):
- ALWAYS mention the currency for monetary amounts (USD, EUR, ARS, etc.).
- If data contains multiple currencies, present them separately.
- NEVER sum amounts in different currencies without explicitly converting them first.
- When showing total_cents or line_total_cents, always specify the currency.

DATA ACCURACY:
- Use ONLY the exact values from the digest. Do NOT invent, approximate, or guess.
- If a value is missing or null in the digest, acknowledge it clearly.
- Present numeric values exactly as they appear (do not round unless asked).
- If the digest is empty or minimal, acknowledge the limitation clearly.

PRESENTATION:
- Present the data naturally without mentioning technical limitations unless necessary.
- Use clear, professional language with proper formatting for numbers and lists."#;

/// Build the summarization messages from the executed plan and digests.
pub fn summary_messages(
    question: &str,
    history: &str,
    plan: &Plan,
    runs: &[ToolRun],
) -> Vec<Message> {
    let mut plan_lines = Vec::with_capacity(plan.steps.len());
    for step in &plan.steps {
        let sql_preview = step
            .arguments
            .get("sql")
            .and_then(serde_json::Value::as_str)
            .map(|sql| sql.replace('\n', " "))
            .unwrap_or_default();
        let description =
            if step.description.is_empty() { "no description" } else { &step.description };
        plan_lines.push(format!("- {}: {description} | {} | {sql_preview}", step.id, step.tool));
    }
    let plan_text = if plan_lines.is_empty() {
        "(no steps executed)".to_string()
    } else {
        plan_lines.join("\n")
    };

    let mut result_lines = Vec::with_capacity(runs.len());
    for run in runs {
        let summary = &run.summary;
        if run.tool == GET_SCHEMA {
            result_lines.push(format!(
                "- {}: schema_tables=[{}] total_tables={}",
                run.step_id,
                summary.schema_tables.join(", "),
                summary.schema_total_tables.unwrap_or(0),
            ));
            continue;
        }
        let preview = summary
            .sample_rows
            .as_ref()
            .map(|rows| serde_json::to_string(rows).unwrap_or_default())
            .unwrap_or_default();
        result_lines.push(format!(
            "- {}: success={} rows={} complete_result={} omitted_rows={} truncated={} preview={preview}",
            run.step_id,
            summary.success,
            summary.row_count.unwrap_or(0),
            summary.complete_result.map(|c| c.to_string()).unwrap_or_else(|| "n/a".into()),
            summary.omitted_rows.unwrap_or(0),
            summary.truncated,
        ));
    }
    let result_text = if result_lines.is_empty() {
        "(no tools were executed)".to_string()
    } else {
        result_lines.join("\n")
    };

    let notes = plan.notes.as_deref().unwrap_or("No additional planner notes.");

    let user = format!(
        "### User question\n{question}\n\n\
         ### Conversation history\n{}\n\n\
         ### Plan executed\n{plan_text}\n\n\
         ### Tool results digest\n{result_text}\n\n\
         ### Planner notes\n{notes}\n\n\
         Draft the final answer using only the information above. If the data is \
         insufficient, explain that clearly and suggest the next actionable step.",
        if history.is_empty() { "No prior history." } else { history },
    );

    vec![Message::system(SUMMARY_SYSTEM_PROMPT), Message::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use ia_domain::plan::{PlanStep, RunDigest};

    #[test]
    fn empty_plan_is_announced_as_such() {
        let plan = Plan::empty(None);
        let messages = summary_messages("how many?", "", &plan, &[]);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("(no steps executed)"));
        assert!(messages[1].content.contains("(no tools were executed)"));
        assert!(messages[1].content.contains("No prior history."));
    }

    #[test]
    fn digest_lines_carry_completeness_flags() {
        let plan = Plan {
            needs_data: true,
            steps: vec![PlanStep {
                id: "step1".into(),
                tool: "execute_sql_query".into(),
                description: "count invoices".into(),
                arguments: json!({"sql": "SELECT COUNT(*)\nFROM invoices"}),
            }],
            notes: Some("one query".into()),
        };
        let runs = vec![ToolRun {
            step_id: "step1".into(),
            tool: "execute_sql_query".into(),
            arguments: json!({}),
            summary: RunDigest {
                tool: "execute_sql_query".into(),
                success: true,
                row_count: Some(120),
                omitted_rows: Some(70),
                complete_result: Some(false),
                sample_rows: Some(vec![json!({"n": 120})]),
                ..Default::default()
            },
            raw: serde_json::Value::Null,
            error: None,
        }];

        let messages = summary_messages("how many?", "User: hi", &plan, &runs);
        let user = &messages[1].content;
        assert!(user.contains("count invoices"));
        // SQL previews are single-line.
        assert!(user.contains("SELECT COUNT(*) FROM invoices"));
        assert!(user.contains("complete_result=false"));
        assert!(user.contains("omitted_rows=70"));
        assert!(user.contains("one query"));
    }

    #[test]
    fn schema_runs_render_table_lists() {
        let plan = Plan::empty(None);
        let runs = vec![ToolRun {
            step_id: "step0".into(),
            tool: "get_database_schema".into(),
            arguments: json!({}),
            summary: RunDigest {
                tool: "get_database_schema".into(),
                success: true,
                schema_tables: vec!["invoices".into(), "items".into()],
                schema_total_tables: Some(2),
                ..Default::default()
            },
            raw: serde_json::Value::Null,
            error: None,
        }];
        let messages = summary_messages("q", "", &plan, &runs);
        assert!(messages[1].content.contains("schema_tables=[invoices, items] total_tables=2"));
    }
}
