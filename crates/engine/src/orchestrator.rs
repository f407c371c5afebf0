//! The question-answering orchestrator.
//!
//! Per question: local short-circuit → answer-cache lookup → planning
//! attempt loop (gated model call, parse, execute, analyze) → fallback
//! (at most once) → summarization (gated model call) → answer-cache
//! store.  Data-layer failures travel as structured digests; the only
//! errors that escape construction are configuration problems.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ia_domain::chat::{Message, Role};
use ia_domain::config::{AssistantConfig, Config, LlmConfig};
use ia_domain::plan::{Plan, ToolRun};
use ia_domain::Result;
use ia_providers::ChatRequest;
use ia_sandbox::{tool_definitions, SchemaInfo, SqliteSandbox};

use crate::cache::AnswerCache;
use crate::diagnostics::{self, ExecutionIssue};
use crate::digest;
use crate::executor::execute_plan;
use crate::fallback::fallback_plan;
use crate::gateway::ChatGateway;
use crate::planner::{self, parse_plan};
use crate::summarizer;

const OUT_OF_DOMAIN_ANSWER: &str =
    "I'm sorry, I can only answer questions about the invoices in my database.";
const APOLOGY_ANSWER: &str =
    "I'm sorry, I couldn't produce an answer right now. Please try again in a moment.";
const GREETING_ANSWER: &str = "Hello! How can I help you with the invoices?";
const THANKS_ANSWER: &str = "You're welcome! I'm here if you need anything else.";
const EMPTY_QUESTION_ANSWER: &str = "I need a question to help you.";

/// Outcome of one question-answering invocation.
#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub plan: Plan,
    pub tool_runs: Vec<ToolRun>,
    pub cached: bool,
    pub used_fallback: bool,
    pub plan_attempts: u32,
}

impl Answer {
    fn direct(answer: impl Into<String>, cached: bool) -> Self {
        Self {
            answer: answer.into(),
            plan: Plan::empty(None),
            tool_runs: Vec::new(),
            cached,
            used_fallback: false,
            plan_attempts: 0,
        }
    }
}

struct PlannedRun {
    plan: Plan,
    tool_runs: Vec<ToolRun>,
    used_fallback: bool,
    attempts: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assistant
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Assistant {
    sandbox: Arc<SqliteSandbox>,
    chat: ChatGateway,
    cache: AnswerCache,
    llm: LlmConfig,
    config: AssistantConfig,
    catalog: HashSet<String>,
    plan_prompt: String,
    schema_summary: String,
}

impl Assistant {
    /// Wire the assistant.  Loads the schema once (it is cached by the
    /// sandbox afterwards); an unreadable database is fatal here.
    pub fn new(sandbox: Arc<SqliteSandbox>, chat: ChatGateway, config: &Config) -> Result<Self> {
        let tools = tool_definitions();
        let catalog: HashSet<String> = tools.iter().map(|t| t.name.clone()).collect();
        let plan_prompt = planner::plan_system_prompt(&planner::describe_tools(&tools));
        let schema_summary = sandbox.schema()?.summary(4);

        tracing::info!(
            tools = catalog.len(),
            plan_model = %config.llm.plan_model,
            summary_model = %config.llm.summary_model,
            "assistant ready"
        );

        Ok(Self {
            sandbox,
            chat,
            cache: AnswerCache::new(Duration::from_secs(config.assistant.answer_cache_ttl_secs)),
            llm: config.llm.clone(),
            config: config.assistant.clone(),
            catalog,
            plan_prompt,
            schema_summary,
        })
    }

    pub fn limiter_stats(&self) -> crate::quota::RateStats {
        self.chat.limiter().stats()
    }

    /// Answer a question end to end.  Never fails outright: terminal
    /// backend problems degrade to an apologetic answer.
    pub async fn answer(&self, question: &str, history: &[Message]) -> Answer {
        if let Some(reply) = local_reply(question) {
            return Answer::direct(reply, false);
        }

        if let Some(answer) = self.cache.get(question, None) {
            tracing::info!(question = %preview(question), "answer cache hit");
            return Answer::direct(answer, true);
        }

        let history_text = format_history(trim_history(history, self.config.max_history_messages));
        let planned = self.plan_with_feedback(question, &history_text).await;

        // The model decided no data is needed (out of domain, or the
        // degraded empty plan with no fallback available).
        if !planned.plan.needs_data && planned.tool_runs.is_empty() {
            let answer = planned
                .plan
                .notes
                .clone()
                .filter(|notes| !notes.trim().is_empty())
                .unwrap_or_else(|| OUT_OF_DOMAIN_ANSWER.to_string());
            return Answer {
                answer,
                plan: planned.plan,
                tool_runs: Vec::new(),
                cached: false,
                used_fallback: planned.used_fallback,
                plan_attempts: planned.attempts,
            };
        }

        let messages =
            summarizer::summary_messages(question, &history_text, &planned.plan, &planned.tool_runs);
        let request = ChatRequest {
            model: self.llm.summary_model.clone(),
            messages,
            temperature: self.llm.summary_temperature,
            max_tokens: self.llm.summary_max_tokens,
        };

        let answer = match self.chat.chat(&request, "summary").await {
            Ok(resp) => resp.content.trim().to_string(),
            Err(e) => {
                tracing::error!(error = %e, "summarization failed, returning apology");
                return Answer {
                    answer: APOLOGY_ANSWER.to_string(),
                    plan: planned.plan,
                    tool_runs: planned.tool_runs,
                    cached: false,
                    used_fallback: planned.used_fallback,
                    plan_attempts: planned.attempts,
                };
            }
        };

        let fingerprint = digest::fingerprint(&planned.plan, &planned.tool_runs);
        self.cache.set(question, &answer, Some(fingerprint));

        Answer {
            answer,
            plan: planned.plan,
            tool_runs: planned.tool_runs,
            cached: false,
            used_fallback: planned.used_fallback,
            plan_attempts: planned.attempts,
        }
    }

    // ── Planning loop ────────────────────────────────────────────────

    async fn plan_with_feedback(&self, question: &str, history: &str) -> PlannedRun {
        let fallback = if self.config.disable_fallback { None } else { fallback_plan(question) };

        let mut feedback: Option<String> = None;
        let mut plan = Plan::empty(None);
        let mut tool_runs: Vec<ToolRun> = Vec::new();
        let mut last_issue: Option<ExecutionIssue> = None;
        let mut used_fallback = false;
        let mut attempts = 0;

        for attempt in 1..=self.config.max_plan_attempts {
            attempts = attempt;
            plan = self.request_plan(question, history, feedback.as_deref(), attempt).await;

            // An empty or data-declining plan goes straight to the
            // fallback when one exists for this question.
            if (plan.steps.is_empty() || !plan.needs_data) && !used_fallback {
                if let Some(fb) = &fallback {
                    tracing::info!(question = %preview(question), "applying fallback plan");
                    plan = fb.clone();
                    used_fallback = true;
                }
            }

            tool_runs = execute_plan(&self.sandbox, &plan, &self.config).await;
            last_issue = diagnostics::analyze(&plan, &tool_runs);

            let Some(issue) = &last_issue else { break };
            if used_fallback {
                tracing::warn!(
                    question = %preview(question),
                    "fallback plan did not resolve the issue"
                );
                break;
            }
            feedback = Some(self.build_feedback(issue));
        }

        // Retries exhausted without the fallback having had its shot:
        // run it once, then proceed with whatever it produced.
        if last_issue.is_some() && !used_fallback {
            if let Some(fb) = fallback {
                tracing::info!(
                    question = %preview(question),
                    "planner attempts failed, retrying with fallback plan"
                );
                plan = fb;
                tool_runs = execute_plan(&self.sandbox, &plan, &self.config).await;
                used_fallback = true;
            }
        }

        PlannedRun { plan, tool_runs, used_fallback, attempts }
    }

    async fn request_plan(
        &self,
        question: &str,
        history: &str,
        feedback: Option<&str>,
        attempt: u32,
    ) -> Plan {
        let messages = planner::plan_messages(
            &self.plan_prompt,
            question,
            history,
            &self.schema_summary,
            feedback,
        );
        let request = ChatRequest {
            model: self.llm.plan_model.clone(),
            messages,
            temperature: self.llm.plan_temperature,
            max_tokens: self.llm.plan_max_tokens,
        };
        let tag = format!("plan_attempt_{attempt}");

        match self.chat.chat(&request, &tag).await {
            Ok(resp) => match parse_plan(&resp.content, &self.catalog) {
                Ok(plan) => {
                    tracing::debug!(attempt, steps = plan.steps.len(), "planner output parsed");
                    plan
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "planner output could not be parsed");
                    Plan::empty(Some("Unable to interpret the plan produced by the model.".into()))
                }
            },
            Err(e) => {
                tracing::error!(attempt, error = %e, "planner call failed");
                Plan::empty(None)
            }
        }
    }

    fn build_feedback(&self, issue: &ExecutionIssue) -> String {
        match self.sandbox.schema() {
            Ok(schema) => diagnostics::retry_feedback(issue, &schema),
            Err(_) => {
                diagnostics::retry_feedback(issue, &SchemaInfo { tables: Default::default() })
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Local helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Canned replies that never touch the cache, the planner, or quota.
fn local_reply(question: &str) -> Option<String> {
    const GREETINGS: &[&str] = &["hi", "hello", "hey", "good morning", "good afternoon", "hola"];
    const THANKS: &[&str] = &["thanks", "thank you", "thanks a lot", "many thanks", "gracias"];

    let normalized = question.trim().to_lowercase();
    if normalized.is_empty() {
        return Some(EMPTY_QUESTION_ANSWER.to_string());
    }
    if GREETINGS.contains(&normalized.as_str()) {
        return Some(GREETING_ANSWER.to_string());
    }
    if THANKS.contains(&normalized.as_str()) {
        return Some(THANKS_ANSWER.to_string());
    }
    None
}

fn trim_history(history: &[Message], max: usize) -> &[Message] {
    if max == 0 || history.is_empty() {
        return &[];
    }
    if history.len() <= max {
        history
    } else {
        &history[history.len() - max..]
    }
}

fn format_history(history: &[Message]) -> String {
    history
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| {
            let role = match m.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{role}: {}", m.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(question: &str) -> String {
    question.chars().take(60).collect()
}
