//! Pure OpenAI REST API client
//!
//! A clean, minimal client for the OpenAI API with no domain-specific logic.
//! Supports chat completions and the asynchronous Batch API.
//!
//! # Example
//!
//! ```rust,ignore
//! use openai_client::{OpenAIClient, ChatRequest, Message};
//!
//! let client = OpenAIClient::from_env()?;
//!
//! // Chat completion
//! let response = client.chat_completion(ChatRequest {
//!     model: "gpt-4o".into(),
//!     messages: vec![Message::user("Hello!")],
//!     ..Default::default()
//! }).await?;
//! ```
//!
//! # Batch API
//!
//! ```rust,ignore
//! use openai_client::batch::BatchLine;
//!
//! let lines = vec![BatchLine::chat("request-0", request)];
//! let file_id = client.upload_batch_file("batch.jsonl", &lines).await?;
//! let batch = client.create_batch(&file_id, Default::default()).await?;
//!
//! // ...hours later
//! let batch = client.retrieve_batch(&batch.id).await?;
//! if let Some(output) = batch.output_file_id {
//!     let lines = client.batch_output(&output).await?;
//! }
//! ```

pub mod batch;
pub mod error;
pub mod types;

pub use batch::{Batch, BatchLine, BatchOutputLine, BatchStatus};
pub use error::{OpenAIError, Result};
pub use types::*;

use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Pure OpenAI API client.
#[derive(Clone)]
pub struct OpenAIClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create a new OpenAI client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Create from environment variable `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| OpenAIError::Config("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL (for Azure, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Get the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Chat completion.
    ///
    /// Send messages to the chat completion API and get a response.
    /// HTTP 429 is reported as [`OpenAIError::RateLimited`].
    pub async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        let start = std::time::Instant::now();

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "OpenAI request failed");
                OpenAIError::Network(e.to_string())
            })?;

        let response = check_status(response, "chat completion").await?;

        let chat_response: types::ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))?;

        let usage = chat_response.usage.clone();
        let content = chat_response
            .first_content()
            .ok_or_else(|| OpenAIError::Api("No response from OpenAI".into()))?;

        debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis(),
            "OpenAI chat completion"
        );

        Ok(ChatResponse { content, usage })
    }

    /// Upload batch lines as a JSONL file with `purpose=batch`.
    ///
    /// Returns the remote file id.
    pub async fn upload_batch_file(&self, file_name: &str, lines: &[BatchLine]) -> Result<String> {
        let content = batch::to_jsonl(lines)?;

        let part = reqwest::multipart::Part::text(content)
            .file_name(file_name.to_string())
            .mime_str("application/jsonl")
            .map_err(|e| OpenAIError::Config(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part("file", part);

        let response = self
            .http_client
            .post(format!("{}/files", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| OpenAIError::Network(e.to_string()))?;

        let response = check_status(response, "file upload").await?;

        let file: batch::FileObject = response
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))?;

        debug!(file_id = %file.id, lines = lines.len(), "Uploaded batch input file");
        Ok(file.id)
    }

    /// Create a batch job over an uploaded input file.
    pub async fn create_batch(
        &self,
        input_file_id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Batch> {
        let request = batch::CreateBatchRequest {
            input_file_id: input_file_id.to_string(),
            endpoint: batch::CHAT_COMPLETIONS_ENDPOINT.to_string(),
            completion_window: batch::COMPLETION_WINDOW.to_string(),
            metadata,
        };

        let response = self
            .http_client
            .post(format!("{}/batches", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| OpenAIError::Network(e.to_string()))?;

        let response = check_status(response, "batch creation").await?;

        response
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))
    }

    /// Retrieve the current state of a batch job.
    pub async fn retrieve_batch(&self, batch_id: &str) -> Result<Batch> {
        let response = self
            .http_client
            .get(format!("{}/batches/{}", self.base_url, batch_id))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| OpenAIError::Network(e.to_string()))?;

        let response = check_status(response, "batch retrieval").await?;

        response
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))
    }

    /// Request cancellation of a batch job.
    pub async fn cancel_batch(&self, batch_id: &str) -> Result<Batch> {
        let response = self
            .http_client
            .post(format!("{}/batches/{}/cancel", self.base_url, batch_id))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| OpenAIError::Network(e.to_string()))?;

        let response = check_status(response, "batch cancellation").await?;

        response
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))
    }

    /// Download the raw content of a file.
    pub async fn file_content(&self, file_id: &str) -> Result<String> {
        let response = self
            .http_client
            .get(format!("{}/files/{}/content", self.base_url, file_id))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| OpenAIError::Network(e.to_string()))?;

        let response = check_status(response, "file content").await?;

        response
            .text()
            .await
            .map_err(|e| OpenAIError::Network(e.to_string()))
    }

    /// Download and parse a batch output file.
    pub async fn batch_output(&self, output_file_id: &str) -> Result<Vec<BatchOutputLine>> {
        let content = self.file_content(output_file_id).await?;
        batch::parse_output_jsonl(&content)
    }
}

/// Map non-2xx responses onto client errors.
async fn check_status(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!(operation, error = %error_text, "OpenAI rate limit");
        return Err(OpenAIError::RateLimited(error_text));
    }

    warn!(operation, status = %status, error = %error_text, "OpenAI API error");
    Err(OpenAIError::Api(format!(
        "OpenAI {} error ({}): {}",
        operation, status, error_text
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = OpenAIClient::new("sk-test")
            .with_base_url("https://custom.api.com");

        assert_eq!(client.api_key, "sk-test");
        assert_eq!(client.base_url, "https://custom.api.com");
    }

    #[test]
    fn test_rate_limited_is_retryable() {
        assert!(OpenAIError::RateLimited("slow down".into()).is_rate_limited());
        assert!(!OpenAIError::Api("bad request".into()).is_rate_limited());
    }
}
