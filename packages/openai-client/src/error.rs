//! Error types for OpenAI client.

use thiserror::Error;

/// Result type for OpenAI client operations.
pub type Result<T> = std::result::Result<T, OpenAIError>;

/// OpenAI client errors.
#[derive(Debug, Error)]
pub enum OpenAIError {
    /// Configuration error (missing API key, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limited by the API (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// API error (non-2xx response, invalid request)
    #[error("API error: {0}")]
    Api(String),

    /// Parse error (invalid JSON, unexpected response format)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl OpenAIError {
    /// Whether the request may succeed if retried after a pause.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}
