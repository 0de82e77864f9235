//! OpenAI implementation of the [`LlmService`] trait.
//!
//! # Example
//!
//! ```rust,ignore
//! use query_engine::ai::OpenAiService;
//!
//! let llm = OpenAiService::from_env()?;
//! let engine = QueryEngine::open(config, Arc::new(llm)).await?;
//! ```

use async_trait::async_trait;
use openai_client::{
    BatchLine, BatchStatus as OpenAIBatchStatus, ChatRequest, Message, OpenAIClient, OpenAIError,
};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{LlmError, LlmResult, QueryError, Result};
use crate::signature::QuerySignature;
use crate::traits::llm::LlmService;
use crate::types::batch::{BatchJob, BatchOutput, BatchRequest, BatchStatus};

/// [`LlmService`] backed by the OpenAI chat completions and Batch APIs.
#[derive(Clone)]
pub struct OpenAiService {
    client: OpenAIClient,
}

impl OpenAiService {
    pub fn new(client: OpenAIClient) -> Self {
        Self { client }
    }

    /// Create from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let client = OpenAIClient::from_env().map_err(|e| QueryError::Config(e.to_string()))?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &OpenAIClient {
        &self.client
    }
}

/// Chat request carrying every field of the signature.
pub fn chat_request(signature: &QuerySignature) -> ChatRequest {
    let params = signature.params();
    signature
        .messages()
        .iter()
        .fold(ChatRequest::new(signature.model()), |request, message| {
            request.message(Message {
                role: message.role.clone(),
                content: message.content.clone(),
            })
        })
        .temperature(params.temperature)
        .seed(params.seed)
        .output_limit(params.max_tokens)
}

fn map_status(status: OpenAIBatchStatus) -> BatchStatus {
    match status {
        OpenAIBatchStatus::Validating => BatchStatus::Validating,
        OpenAIBatchStatus::InProgress => BatchStatus::InProgress,
        OpenAIBatchStatus::Finalizing => BatchStatus::Finalizing,
        OpenAIBatchStatus::Cancelling => BatchStatus::Cancelling,
        OpenAIBatchStatus::Completed => BatchStatus::Completed,
        OpenAIBatchStatus::Failed => BatchStatus::Failed,
        OpenAIBatchStatus::Expired => BatchStatus::Expired,
        OpenAIBatchStatus::Cancelled => BatchStatus::Cancelled,
    }
}

fn map_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::RateLimited(message) => LlmError::RateLimited(message),
        other => LlmError::Service(Box::new(other)),
    }
}

#[async_trait]
impl LlmService for OpenAiService {
    async fn complete(&self, signature: &QuerySignature) -> LlmResult<String> {
        let response = self
            .client
            .chat_completion(chat_request(signature))
            .await
            .map_err(map_error)?;
        Ok(response.content)
    }

    async fn create_batch(&self, requests: &[BatchRequest]) -> LlmResult<String> {
        let lines: Vec<BatchLine> = requests
            .iter()
            .map(|r| BatchLine::chat(&r.correlation_id, chat_request(&r.signature)))
            .collect();

        let file_name = format!("batch-{}.jsonl", uuid::Uuid::new_v4());
        let file_id = self
            .client
            .upload_batch_file(&file_name, &lines)
            .await
            .map_err(map_error)?;

        let metadata = HashMap::from([("source".to_string(), "query-engine".to_string())]);
        let batch = self
            .client
            .create_batch(&file_id, metadata)
            .await
            .map_err(map_error)?;

        debug!(job_id = %batch.id, file_id = %file_id, count = lines.len(), "Created OpenAI batch");
        Ok(batch.id)
    }

    async fn batch_status(&self, job_id: &str) -> LlmResult<BatchJob> {
        let batch = self.client.retrieve_batch(job_id).await.map_err(map_error)?;
        let job = BatchJob::new(batch.id, map_status(batch.status));
        Ok(match batch.output_file_id {
            Some(file_id) => job.with_output(file_id),
            None => job,
        })
    }

    async fn fetch_batch_output(&self, output_handle: &str) -> LlmResult<Vec<BatchOutput>> {
        let lines = self
            .client
            .batch_output(output_handle)
            .await
            .map_err(map_error)?;

        Ok(lines
            .into_iter()
            .map(|line| {
                let correlation_id = line.custom_id.clone();
                BatchOutput {
                    correlation_id,
                    result: line.into_content(),
                }
            })
            .collect())
    }

    async fn cancel_batch(&self, job_id: &str) -> LlmResult<()> {
        self.client.cancel_batch(job_id).await.map_err(map_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SamplingParams;

    #[test]
    fn test_chat_request_carries_signature() {
        let signature = QuerySignature::new(
            "gpt-4o",
            SamplingParams {
                temperature: 0.2,
                seed: 7,
                max_tokens: 300,
            },
            "system prompt",
            "user prompt",
        );
        let request = chat_request(&signature);

        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.seed, Some(7));
        assert_eq!(request.max_tokens, Some(300));
        assert_eq!(
            request.messages,
            vec![Message::system("system prompt"), Message::user("user prompt")]
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status(OpenAIBatchStatus::Expired), BatchStatus::Expired);
        assert!(map_status(OpenAIBatchStatus::Finalizing).is_pending());
        assert!(map_status(OpenAIBatchStatus::Completed).is_success());
    }

    #[test]
    fn test_rate_limit_is_distinguished() {
        assert!(matches!(
            map_error(OpenAIError::RateLimited("429".into())),
            LlmError::RateLimited(_)
        ));
        assert!(matches!(
            map_error(OpenAIError::Api("400".into())),
            LlmError::Service(_)
        ));
    }
}
