//! Outbound LLM service abstraction.

use async_trait::async_trait;

use crate::error::LlmResult;
use crate::signature::QuerySignature;
use crate::types::batch::{BatchJob, BatchOutput, BatchRequest};

/// A remote chat-completion service with an asynchronous batch API.
///
/// Implementations report HTTP-level throttling as
/// [`LlmError::RateLimited`](crate::error::LlmError::RateLimited) so the
/// executor can retry it; every other failure is `Service`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmService: Send + Sync {
    /// One request/response call. Returns the raw response text.
    async fn complete(&self, signature: &QuerySignature) -> LlmResult<String>;

    /// Submit requests as one batch job. Returns the job id.
    async fn create_batch(&self, requests: &[BatchRequest]) -> LlmResult<String>;

    /// Current status of a job.
    async fn batch_status(&self, job_id: &str) -> LlmResult<BatchJob>;

    /// Result lines of a completed job.
    async fn fetch_batch_output(&self, output_handle: &str) -> LlmResult<Vec<BatchOutput>>;

    /// Ask the service to stop a job. Best effort.
    async fn cancel_batch(&self, _job_id: &str) -> LlmResult<()> {
        Ok(())
    }
}
