//! Batch API types.
//!
//! A batch is a JSONL input file of chat completion requests, each tagged
//! with a `custom_id`, processed asynchronously within a completion window.
//! Results come back as a JSONL output file keyed by the same `custom_id`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{OpenAIError, Result};
use crate::types::{ChatRequest, ChatResponseRaw};

/// Endpoint every batch line targets.
pub const CHAT_COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";

/// Completion window accepted by the Batch API.
pub const COMPLETION_WINDOW: &str = "24h";

/// One line of a batch input file.
#[derive(Debug, Clone, Serialize)]
pub struct BatchLine {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: ChatRequest,
}

impl BatchLine {
    /// Wrap a chat request for the chat completions endpoint.
    pub fn chat(custom_id: impl Into<String>, body: ChatRequest) -> Self {
        Self {
            custom_id: custom_id.into(),
            method: "POST".to_string(),
            url: CHAT_COMPLETIONS_ENDPOINT.to_string(),
            body,
        }
    }
}

/// Serialize batch lines as JSONL.
pub fn to_jsonl(lines: &[BatchLine]) -> Result<String> {
    let mut content = String::new();
    for line in lines {
        let encoded = serde_json::to_string(line)
            .map_err(|e| OpenAIError::Parse(format!("Failed to serialize batch line: {}", e)))?;
        content.push_str(&encoded);
        content.push('\n');
    }
    Ok(content)
}

/// Batch job status as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Validating,
    InProgress,
    Finalizing,
    Cancelling,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl BatchStatus {
    /// The job is still being worked on and must be polled again.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::Validating | Self::InProgress | Self::Finalizing | Self::Cancelling
        )
    }

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::InProgress => "in_progress",
            Self::Finalizing => "finalizing",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request counters attached to a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchRequestCounts {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
}

/// A batch job.
#[derive(Debug, Clone, Deserialize)]
pub struct Batch {
    pub id: String,
    pub status: BatchStatus,
    #[serde(default)]
    pub input_file_id: Option<String>,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
    #[serde(default)]
    pub request_counts: Option<BatchRequestCounts>,
}

/// Batch creation request body.
#[derive(Debug, Serialize)]
pub(crate) struct CreateBatchRequest {
    pub input_file_id: String,
    pub endpoint: String,
    pub completion_window: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Uploaded file handle.
#[derive(Debug, Deserialize)]
pub(crate) struct FileObject {
    pub id: String,
}

/// One line of a batch output (or error) file.
#[derive(Debug, Deserialize)]
pub struct BatchOutputLine {
    pub custom_id: String,
    #[serde(default)]
    pub response: Option<BatchResponse>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// HTTP response captured for one batch line.
#[derive(Debug, Deserialize)]
pub struct BatchResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

impl BatchOutputLine {
    /// Extract the completion text, or a description of why there is none.
    pub fn into_content(self) -> std::result::Result<String, String> {
        if let Some(error) = self.error {
            if !error.is_null() {
                return Err(error.to_string());
            }
        }

        let response = self
            .response
            .ok_or_else(|| "line has neither response nor error".to_string())?;

        if !(200..300).contains(&response.status_code) {
            return Err(format!(
                "status {}: {}",
                response.status_code, response.body
            ));
        }

        let raw: ChatResponseRaw =
            serde_json::from_value(response.body).map_err(|e| e.to_string())?;
        raw.first_content()
            .ok_or_else(|| "response has no content".to_string())
    }
}

/// Parse a JSONL batch output file, skipping blank lines.
pub fn parse_output_jsonl(content: &str) -> Result<Vec<BatchOutputLine>> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l)
                .map_err(|e| OpenAIError::Parse(format!("Invalid batch output line: {}", e)))
        })
        .collect()
}
