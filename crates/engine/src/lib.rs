//! The quota-aware planning/execution/retry engine.
//!
//! Control flow for one question: answer-cache lookup → planner (attempt
//! loop, gated by the rate limiter) → executor → diagnostics (retry /
//! fallback / proceed) → summarizer (gated) → answer-cache store.

pub mod cache;
pub mod diagnostics;
pub mod digest;
pub mod executor;
pub mod fallback;
pub mod gateway;
pub mod orchestrator;
pub mod planner;
pub mod quota;
pub mod summarizer;

pub use cache::AnswerCache;
pub use gateway::ChatGateway;
pub use orchestrator::{Answer, Assistant};
pub use quota::RateLimiter;
