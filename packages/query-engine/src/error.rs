//! Typed errors for the query engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

use crate::types::batch::BatchStatus;

/// Errors that can occur while running queries.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Remote service failed in a way that is not worth retrying
    #[error("LLM service error: {0}")]
    Llm(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Rate limiting persisted through every retry
    #[error("rate limited after {attempts} attempts: {message}")]
    RateLimitExhausted { attempts: u32, message: String },

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Every recovery step failed on the model output
    #[error("unparseable response (last attempt: {cleaned:?})")]
    UnparseableResponse { raw: String, cleaned: String },

    /// A batch job ended in a terminal state other than `completed`
    #[error("batch job {job_id} ended with status {status}")]
    BatchFailed { job_id: String, status: BatchStatus },

    /// A job was created remotely but its pending entries were not recorded
    #[error("batch job {job_id} created but not recorded: {source}")]
    BatchUnrecorded {
        job_id: String,
        #[source]
        source: Box<QueryError>,
    },

    /// Results of a finished job could not be fanned into the cache
    #[error("batch job {job_id} not resolved: {reason}")]
    BatchResolution { job_id: String, reason: String },

    /// Batched run_query called before the batch for this signature resolved
    #[error("batched query not resolved yet (hash {hash_key})")]
    BatchNotResolved { hash_key: String },

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// User-prompt template could not be rendered
    #[error("template error: {reason}")]
    Template { reason: String },

    /// Recovered value does not fit the expected result shape
    #[error("malformed data: {reason}")]
    MalformedData { reason: String },

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<LlmError> for QueryError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimited(message) => QueryError::RateLimitExhausted {
                attempts: 1,
                message,
            },
            LlmError::Service(source) => QueryError::Llm(source),
        }
    }
}

/// Errors reported by an [`LlmService`](crate::traits::llm::LlmService).
#[derive(Debug, Error)]
pub enum LlmError {
    /// The service asked us to slow down
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Any other failure (network, API, parsing)
    #[error("service error: {0}")]
    Service(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LlmError {
    /// Build a service error from a message.
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service(message.into().into())
    }
}

/// Result type alias for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Result type alias for outbound service calls.
pub type LlmResult<T> = std::result::Result<T, LlmError>;
