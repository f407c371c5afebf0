use serde::{Deserialize, Serialize};

/// Model backend configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the chat-completions endpoint (`/chat/completions` is
    /// appended).
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.  The key itself never
    /// appears in config files.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    /// Model used for the planning pass.
    #[serde(default = "d_model")]
    pub plan_model: String,
    /// Model used for the summarization pass.
    #[serde(default = "d_model")]
    pub summary_model: String,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "d_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum outbound attempts per call (429/5xx/timeout retries).
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    /// Output-token budget for the planning call (a compact JSON plan).
    #[serde(default = "d_plan_max_tokens")]
    pub plan_max_tokens: u32,
    /// Output-token budget for the summarization call.
    #[serde(default = "d_summary_max_tokens")]
    pub summary_max_tokens: u32,
    /// Sampling temperature for the planning call.
    #[serde(default)]
    pub plan_temperature: f32,
    /// Sampling temperature for the summarization call.
    #[serde(default = "d_summary_temperature")]
    pub summary_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            api_key_env: d_api_key_env(),
            plan_model: d_model(),
            summary_model: d_model(),
            request_timeout_secs: d_request_timeout_secs(),
            max_attempts: d_max_attempts(),
            plan_max_tokens: d_plan_max_tokens(),
            summary_max_tokens: d_summary_max_tokens(),
            plan_temperature: 0.0,
            summary_temperature: d_summary_temperature(),
        }
    }
}

fn d_base_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn d_api_key_env() -> String {
    "LLM_API_KEY".into()
}
fn d_model() -> String {
    "llama-3.1-8b-instant".into()
}
fn d_request_timeout_secs() -> u64 {
    45
}
fn d_max_attempts() -> u32 {
    4
}
fn d_plan_max_tokens() -> u32 {
    256
}
fn d_summary_max_tokens() -> u32 {
    280
}
fn d_summary_temperature() -> f32 {
    0.2
}
