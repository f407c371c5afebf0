//! Plan execution against the query sandbox.
//!
//! Steps run strictly in order; a failing step never aborts the
//! remaining ones.  The diagnostics pass decides what a failure means.
//! Sandbox work is blocking (rusqlite), so each call runs on the
//! blocking thread pool.

use std::sync::Arc;

use serde_json::{json, Value};

use ia_domain::config::AssistantConfig;
use ia_domain::plan::{Plan, RunDigest, ToolRun};
use ia_sandbox::{SqliteSandbox, ToolReply};

use crate::digest::digest_reply;

/// Run every step of a plan, collecting one [`ToolRun`] per step.
pub async fn execute_plan(
    sandbox: &Arc<SqliteSandbox>,
    plan: &Plan,
    cfg: &AssistantConfig,
) -> Vec<ToolRun> {
    let mut runs = Vec::with_capacity(plan.steps.len());
    if !plan.needs_data {
        return runs;
    }

    for step in &plan.steps {
        let sandbox = sandbox.clone();
        let tool = step.tool.clone();
        let arguments = step.arguments.clone();

        let joined = tokio::task::spawn_blocking({
            let tool = tool.clone();
            let arguments = arguments.clone();
            move || sandbox.call_tool(&tool, &arguments)
        })
        .await;

        let run = match joined {
            Ok(reply) => ToolRun {
                step_id: step.id.clone(),
                tool: tool.clone(),
                arguments,
                summary: digest_reply(&tool, &reply, cfg),
                raw: raw_value(&reply),
                error: None,
            },
            Err(e) => {
                tracing::error!(tool = %tool, error = %e, "tool execution task failed");
                ToolRun {
                    step_id: step.id.clone(),
                    tool: tool.clone(),
                    arguments,
                    summary: RunDigest {
                        tool: tool.clone(),
                        success: false,
                        error: Some(e.to_string()),
                        ..Default::default()
                    },
                    raw: Value::Null,
                    error: Some(e.to_string()),
                }
            }
        };
        runs.push(run);
    }

    runs
}

fn raw_value(reply: &ToolReply) -> Value {
    match reply {
        ToolReply::Query(result) => serde_json::to_value(result).unwrap_or(Value::Null),
        ToolReply::Schema(schema) => {
            json!({ "success": true, "schema": serde_json::to_value(schema.as_ref()).unwrap_or(Value::Null) })
        }
    }
}
