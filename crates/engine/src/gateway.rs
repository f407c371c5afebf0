//! Gated chat client: the call discipline shared by both model passes.
//!
//! Every outbound call is admitted through the rate limiter first;
//! every admitted-but-failed call cancels its reservation, including the
//! final attempt, so quota is never leaked on terminal failure.  429 and
//! transient 5xx/timeout responses retry with exponential backoff up to
//! the configured attempt cap.

use std::sync::Arc;
use std::time::Duration;

use ia_domain::{Error, Result};
use ia_providers::{ChatRequest, ChatResponse, LlmProvider};

use crate::quota::RateLimiter;

pub struct ChatGateway {
    provider: Arc<dyn LlmProvider>,
    limiter: Arc<RateLimiter>,
    max_attempts: u32,
}

impl ChatGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, limiter: Arc<RateLimiter>, max_attempts: u32) -> Self {
        Self { provider, limiter, max_attempts: max_attempts.max(1) }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Provisional quota charge for a call: serialized prompt length / 4
    /// plus the requested output budget.  Corrected on finalize.
    pub(crate) fn estimate_tokens(req: &ChatRequest) -> u64 {
        let prompt_len = serde_json::to_string(&req.messages).map(|s| s.len()).unwrap_or(0);
        (prompt_len as u64).div_ceil(4) + req.max_tokens as u64
    }

    /// One chat completion under admission control and bounded retry.
    pub async fn chat(&self, req: &ChatRequest, tag: &str) -> Result<ChatResponse> {
        let estimate = Self::estimate_tokens(req);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let entry = self.limiter.admit(estimate, tag).await;

            match self.provider.chat(req).await {
                Ok(resp) => {
                    let (prompt, completion) = match resp.usage {
                        Some(u) => (u.prompt_tokens, u.completion_tokens),
                        // Backend reported no usage: charge the prompt
                        // estimate and assume no output.
                        None => (estimate.saturating_sub(req.max_tokens as u64), 0),
                    };
                    self.limiter.finalize(entry, prompt, completion);
                    return Ok(resp);
                }
                Err(err) => {
                    self.limiter.cancel(entry);

                    let backoff = match &err {
                        Error::RateLimited { retry_after } => retry_after
                            .map(|s| Duration::from_secs(s.min(60)))
                            .unwrap_or_else(|| backoff_for(attempt)),
                        Error::Upstream { .. } | Error::Timeout(_) => backoff_for(attempt),
                        _ => return Err(err),
                    };

                    if attempt >= self.max_attempts {
                        tracing::error!(
                            tag,
                            attempts = attempt,
                            error = %err,
                            "chat call failed after all retries"
                        );
                        return Err(err);
                    }

                    tracing::warn!(
                        tag,
                        attempt,
                        wait_secs = backoff.as_secs(),
                        error = %err,
                        "retrying chat call"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

fn backoff_for(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use ia_domain::chat::{Message, Usage};
    use ia_domain::config::QuotaConfig;

    struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<ChatResponse>>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<ChatResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().pop_front().expect("unscripted call")
        }

        fn provider_id(&self) -> &str {
            "scripted"
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "test-model".into(),
            messages: vec![Message::system("be brief"), Message::user("how many?")],
            temperature: 0.0,
            max_tokens: 100,
        }
    }

    fn response(prompt: u64, completion: u64) -> ChatResponse {
        ChatResponse {
            content: "answer".into(),
            usage: Some(Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }),
            model: "test-model".into(),
        }
    }

    fn wide_limits() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(QuotaConfig {
            requests_per_minute: 100,
            requests_per_day: 1_000,
            tokens_per_minute: 100_000,
            tokens_per_day: 1_000_000,
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_succeeds() {
        let provider = ScriptedProvider::new(vec![
            Err(Error::Upstream { status: 503, message: "bad gateway day".into() }),
            Err(Error::RateLimited { retry_after: Some(2) }),
            Ok(response(120, 30)),
        ]);
        let limiter = wide_limits();
        let gateway = ChatGateway::new(provider.clone(), limiter.clone(), 4);

        let resp = gateway.chat(&request(), "plan").await.unwrap();
        assert_eq!(resp.content, "answer");
        assert_eq!(provider.calls(), 3);

        // Only the successful call holds quota; the two failures were
        // cancelled.
        let stats = limiter.stats();
        assert_eq!(stats.usage.requests_per_minute, 1);
        assert_eq!(stats.usage.tokens_per_minute, 150);
        assert_eq!(stats.breakdown["plan"].requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_leaves_no_reservation() {
        let provider = ScriptedProvider::new(vec![
            Err(Error::RateLimited { retry_after: None }),
            Err(Error::RateLimited { retry_after: None }),
        ]);
        let limiter = wide_limits();
        let gateway = ChatGateway::new(provider.clone(), limiter.clone(), 2);

        let err = gateway.chat(&request(), "plan").await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
        assert_eq!(provider.calls(), 2);

        let stats = limiter.stats();
        assert_eq!(stats.usage.requests_per_minute, 0);
        assert_eq!(stats.usage.tokens_per_minute, 0);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let provider = ScriptedProvider::new(vec![Err(Error::Provider {
            provider: "scripted".into(),
            message: "invalid api key".into(),
        })]);
        let limiter = wide_limits();
        let gateway = ChatGateway::new(provider.clone(), limiter.clone(), 4);

        let err = gateway.chat(&request(), "summary").await.unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
        assert_eq!(provider.calls(), 1);
        assert_eq!(limiter.stats().usage.requests_per_minute, 0);
    }

    #[tokio::test]
    async fn missing_usage_falls_back_to_prompt_estimate() {
        let provider = ScriptedProvider::new(vec![Ok(ChatResponse {
            content: "answer".into(),
            usage: None,
            model: "test-model".into(),
        })]);
        let limiter = wide_limits();
        let gateway = ChatGateway::new(provider, limiter.clone(), 4);

        let req = request();
        let estimate = ChatGateway::estimate_tokens(&req);
        gateway.chat(&req, "plan").await.unwrap();

        let stats = limiter.stats();
        assert_eq!(stats.usage.tokens_per_minute, estimate - req.max_tokens as u64);
    }

    #[test]
    fn estimate_scales_with_prompt_and_output_budget() {
        let req = request();
        let estimate = ChatGateway::estimate_tokens(&req);
        assert!(estimate > req.max_tokens as u64);

        let mut bigger = request();
        bigger.messages.push(Message::user("x".repeat(4_000)));
        assert!(ChatGateway::estimate_tokens(&bigger) > estimate + 900);
    }
}
