//! Plan prompt construction and plan parsing.
//!
//! The planner model must return one JSON object; markdown code fences
//! around it are tolerated.  Parsing is deliberately forgiving at the
//! step level (robustness over strictness): steps referencing unknown
//! tools and malformed steps are dropped and logged, while a payload
//! that is not a JSON object with a list of steps raises a structured
//! parse error the orchestrator turns into a degraded empty plan.

use std::collections::HashSet;

use serde_json::Value;

use ia_domain::chat::Message;
use ia_domain::plan::{Plan, PlanStep};
use ia_domain::{Error, Result};
use ia_sandbox::EXECUTE_SQL;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// System prompt for the planning pass.
pub fn plan_system_prompt(tools_text: &str) -> String {
    format!(
        r#"You are an expert SQL analyst for an invoices database. Design a tool-based plan
that answers the question using only the available SQLite database.

RULES:
1. You ONLY answer questions about data in this invoices database. If the question
   is about something unrelated (weather, sports, general knowledge, etc.), set
   "needs_data" to false and explain that you only work with invoice data.
2. ALWAYS call `get_database_schema` as your FIRST step when needs_data=true.
   NEVER invent or guess table/column names.
3. After consulting the schema, propose a read-only SQL query using
   `execute_sql_query` or use a specialized tool. Every SQL statement MUST begin
   with SELECT, PRAGMA, or EXPLAIN.
4. Let the schema be your source of truth: if you cannot find relevant tables or
   columns for the question, set "needs_data" to false and explain the limitation.

ALWAYS return a single valid JSON object with this structure:
{{
  "needs_data": true | false,
  "steps": [
    {{
      "id": "step1",
      "tool": "get_database_schema",
      "description": "Inspect schema to confirm table/column names",
      "arguments": {{}}
    }},
    {{
      "id": "step2",
      "tool": "execute_sql_query",
      "description": "Query the relevant data",
      "arguments": {{"sql": "SELECT ..."}}
    }}
  ],
  "notes": "optional comments"
}}

Additional rules:
- Use only the available tool names listed below.
- Keep a maximum of three concise, relevant steps.
- If you can answer directly without data (e.g. greetings), set "needs_data" to false.
- Describe calculated fields to help the second-pass summarization.

Available tools:
{tools_text}"#
    )
}

/// User message for one planning attempt, optionally carrying corrective
/// feedback from the previous attempt.
pub fn plan_messages(
    system_prompt: &str,
    question: &str,
    history: &str,
    schema_summary: &str,
    feedback: Option<&str>,
) -> Vec<Message> {
    let mut user = format!(
        "### User question\n{question}\n\n\
         ### Conversation history\n{}\n\n\
         ### Known schema summary\n{schema_summary}",
        if history.is_empty() { "No prior history." } else { history },
    );
    if let Some(feedback) = feedback {
        user.push_str(&format!("\n\n### Feedback from previous attempt\n{}", feedback.trim()));
    }
    vec![Message::system(system_prompt), Message::user(user)]
}

/// Render the tool catalog as a bullet list for the system prompt.
pub fn describe_tools(tools: &[ia_domain::chat::ToolDefinition]) -> String {
    let lines: Vec<String> =
        tools.iter().map(|t| format!("• {}: {}", t.name, t.description)).collect();
    if lines.is_empty() {
        "(no tools registered)".to_string()
    } else {
        lines.join("\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn strip_markdown_fence(content: &str) -> &str {
    let stripped = content.trim();
    if !stripped.starts_with("```") {
        return stripped;
    }
    let stripped = stripped.trim_matches('`').trim();
    if let Some(rest) = stripped.strip_prefix("json") {
        rest.trim_start()
    } else {
        stripped
    }
}

/// Parse planner output into a [`Plan`], keeping only steps that
/// reference known tools (and, for the free-form SQL tool, carry a
/// string `sql` argument).
pub fn parse_plan(content: &str, catalog: &HashSet<String>) -> Result<Plan> {
    let cleaned = strip_markdown_fence(content);
    let payload: Value = serde_json::from_str(cleaned)
        .map_err(|_| Error::PlanParse("planner returned invalid JSON".into()))?;

    let steps_raw = match payload.get("steps") {
        None => Vec::new(),
        Some(Value::Array(steps)) => steps.clone(),
        Some(_) => return Err(Error::PlanParse("plan steps must be a list".into())),
    };

    let mut steps = Vec::new();
    for (idx, step) in steps_raw.iter().enumerate() {
        let Some(obj) = step.as_object() else {
            tracing::debug!(index = idx, "dropping non-object plan step");
            continue;
        };
        let Some(tool) = obj.get("tool").and_then(Value::as_str) else {
            tracing::debug!(index = idx, "dropping plan step without a tool name");
            continue;
        };
        if !catalog.contains(tool) {
            tracing::debug!(tool, "dropping plan step with unknown tool");
            continue;
        }

        let arguments = match obj.get("arguments") {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            Some(_) => Value::Object(Default::default()),
            // Some models emit the SQL at step level; fold it in.
            None => match obj.get("sql") {
                Some(sql) => serde_json::json!({ "sql": sql.clone() }),
                None => Value::Object(Default::default()),
            },
        };

        if tool == EXECUTE_SQL && !arguments.get("sql").map(Value::is_string).unwrap_or(false) {
            tracing::debug!(index = idx, "dropping SQL step without a string `sql` argument");
            continue;
        }

        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("step{}", idx + 1));
        let description =
            obj.get("description").and_then(Value::as_str).unwrap_or("").to_string();

        steps.push(PlanStep { id, tool: tool.to_string(), description, arguments });
    }

    // Surviving steps force `needs_data`; an absent flag means "has steps".
    let needs_data = match payload.get("needs_data") {
        Some(flag) => flag.as_bool().unwrap_or(false) || !steps.is_empty(),
        None => !steps.is_empty(),
    };
    let notes = payload
        .get("notes")
        .or_else(|| payload.get("comment"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Plan { needs_data, steps, notes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> HashSet<String> {
        ["execute_sql_query", "get_database_schema", "get_recent_invoices"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_a_well_formed_plan() {
        let content = r#"
        {
          "needs_data": true,
          "steps": [
            {"id": "step1", "tool": "get_database_schema", "description": "inspect", "arguments": {}},
            {"id": "step2", "tool": "execute_sql_query", "description": "count",
             "arguments": {"sql": "SELECT COUNT(*) FROM invoices"}}
          ],
          "notes": "simple count"
        }"#;
        let plan = parse_plan(content, &catalog()).unwrap();
        assert!(plan.needs_data);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].arguments["sql"], "SELECT COUNT(*) FROM invoices");
        assert_eq!(plan.notes.as_deref(), Some("simple count"));
    }

    #[test]
    fn tolerates_markdown_fences() {
        let content = "```json\n{\"needs_data\": false, \"steps\": []}\n```";
        let plan = parse_plan(content, &catalog()).unwrap();
        assert!(!plan.needs_data);
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let err = parse_plan("the plan is: look at the schema", &catalog()).unwrap_err();
        assert!(matches!(err, Error::PlanParse(_)));
    }

    #[test]
    fn non_list_steps_is_a_parse_error() {
        let err = parse_plan(r#"{"needs_data": true, "steps": "schema"}"#, &catalog()).unwrap_err();
        assert!(matches!(err, Error::PlanParse(_)));
    }

    #[test]
    fn unknown_tools_are_dropped_silently() {
        let content = r#"{"needs_data": true, "steps": [
            {"id": "a", "tool": "launch_missiles", "arguments": {}},
            {"id": "b", "tool": "get_recent_invoices", "arguments": {"limit": 5}}
        ]}"#;
        let plan = parse_plan(content, &catalog()).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool, "get_recent_invoices");
    }

    #[test]
    fn sql_step_without_string_sql_is_dropped() {
        let content = r#"{"needs_data": true, "steps": [
            {"id": "a", "tool": "execute_sql_query", "arguments": {"sql": 7}}
        ]}"#;
        let plan = parse_plan(content, &catalog()).unwrap();
        assert!(plan.steps.is_empty());
        // No surviving steps and an explicit true flag: needs_data holds.
        assert!(plan.needs_data);
    }

    #[test]
    fn step_level_sql_is_folded_into_arguments() {
        let content = r#"{"steps": [
            {"id": "a", "tool": "execute_sql_query", "sql": "SELECT 1"}
        ]}"#;
        let plan = parse_plan(content, &catalog()).unwrap();
        assert_eq!(plan.steps[0].arguments["sql"], "SELECT 1");
    }

    #[test]
    fn surviving_steps_force_needs_data() {
        let content = r#"{"needs_data": false, "steps": [
            {"tool": "get_database_schema"}
        ]}"#;
        let plan = parse_plan(content, &catalog()).unwrap();
        assert!(plan.needs_data);
        assert_eq!(plan.steps[0].id, "step1");
    }
}
