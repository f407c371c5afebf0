/// Shared error type used across all InvoiceAgent crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// HTTP 429 from the model backend. `retry_after` is the parsed
    /// `retry-after` header in seconds, when the backend sent one.
    #[error("upstream rate limit (retry-after: {retry_after:?})")]
    RateLimited { retry_after: Option<u64> },

    /// Transient 5xx from the model backend.
    #[error("upstream {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("plan parse: {0}")]
    PlanParse(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
