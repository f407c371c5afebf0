use ia_domain::chat::{Message, Usage};
use ia_domain::Result;

/// Request for a single (non-streaming) chat completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Parsed chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<Usage>,
    pub model: String,
}

/// A synchronous request/response model backend.
///
/// Implementations must map HTTP 429 to [`ia_domain::Error::RateLimited`]
/// and transient 5xx to [`ia_domain::Error::Upstream`] so the caller's
/// retry loop can tell them apart from terminal failures.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    fn provider_id(&self) -> &str;
}
