//! Testing utilities including mock implementations.
//!
//! These are useful for testing code built on the engine without making
//! real LLM calls.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{LlmError, LlmResult};
use crate::signature::QuerySignature;
use crate::traits::llm::LlmService;
use crate::types::batch::{BatchJob, BatchOutput, BatchRequest, BatchStatus};

/// A mock LLM service for testing.
///
/// Responses are scripted per user message. Batch jobs get ids
/// `batch_1`, `batch_2`, ... and complete on the first poll unless a
/// status sequence is scripted; the last status of a sequence repeats.
#[derive(Default)]
pub struct MockLlm {
    /// Responses by user message
    responses: Arc<RwLock<HashMap<String, String>>>,

    /// Response for unscripted user messages
    default_response: Option<String>,

    /// Remaining `complete` calls that fail with a rate limit
    rate_limits: Arc<RwLock<u32>>,

    /// Scripted status sequences by job id
    statuses: Arc<RwLock<HashMap<String, VecDeque<BatchStatus>>>>,

    /// Submitted requests by job id
    batches: Arc<RwLock<HashMap<String, Vec<BatchRequest>>>>,

    /// Remaining `batch_status` calls that fail with a rate limit
    status_rate_limits: Arc<RwLock<u32>>,

    fail_batch_creation: bool,

    /// Delay before answering `complete` and `fetch_batch_output`
    latency: Option<Duration>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockLlmCall>>>,
}

/// Record of a call made to the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockLlmCall {
    Complete { user: String },
    CreateBatch { job_id: String, count: usize },
    BatchStatus { job_id: String },
    FetchOutput { handle: String },
    CancelBatch { job_id: String },
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `user` with `response`, in both sync and batch calls.
    pub fn with_response(self, user: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses
            .write()
            .unwrap()
            .insert(user.into(), response.into());
        self
    }

    /// Answer every unscripted user message with `response`.
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = Some(response.into());
        self
    }

    /// Fail the next `count` sync calls with a rate limit.
    pub fn with_rate_limits(self, count: u32) -> Self {
        *self.rate_limits.write().unwrap() = count;
        self
    }

    /// Fail the next `count` status polls with a rate limit.
    pub fn with_status_rate_limits(self, count: u32) -> Self {
        *self.status_rate_limits.write().unwrap() = count;
        self
    }

    /// Sleep before every sync answer and every output download.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Script the statuses a job reports, one per poll.
    pub fn with_batch_statuses(self, job_id: impl Into<String>, statuses: Vec<BatchStatus>) -> Self {
        self.set_batch_statuses(&job_id.into(), statuses);
        self
    }

    /// Make every `create_batch` call fail.
    pub fn with_failing_batch_creation(mut self) -> Self {
        self.fail_batch_creation = true;
        self
    }

    pub fn set_batch_statuses(&self, job_id: &str, statuses: Vec<BatchStatus>) {
        self.statuses
            .write()
            .unwrap()
            .insert(job_id.to_string(), statuses.into());
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockLlmCall> {
        self.calls.read().unwrap().clone()
    }

    /// Number of sync `complete` calls.
    pub fn complete_calls(&self) -> usize {
        self.count(|c| matches!(c, MockLlmCall::Complete { .. }))
    }

    /// Number of status polls of one job.
    pub fn status_polls(&self, job_id: &str) -> usize {
        self.count(|c| matches!(c, MockLlmCall::BatchStatus { job_id: id } if id == job_id))
    }

    /// Requests of every created batch, in creation order.
    pub fn submitted_batches(&self) -> Vec<Vec<BatchRequest>> {
        let batches = self.batches.read().unwrap();
        let mut ids: Vec<&String> = batches.keys().collect();
        ids.sort_by_key(|id| job_number(id));
        ids.into_iter().map(|id| batches[id].clone()).collect()
    }

    /// Jobs for which cancellation was requested.
    pub fn cancelled_batches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockLlmCall::CancelBatch { job_id } => Some(job_id),
                _ => None,
            })
            .collect()
    }

    /// Clear call history.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    fn count(&self, predicate: impl Fn(&MockLlmCall) -> bool) -> usize {
        self.calls.read().unwrap().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: MockLlmCall) {
        self.calls.write().unwrap().push(call);
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn response_for(&self, signature: &QuerySignature) -> Option<String> {
        let user = signature.message("user").unwrap_or_default();
        self.responses
            .read()
            .unwrap()
            .get(user)
            .cloned()
            .or_else(|| self.default_response.clone())
    }
}

fn job_number(job_id: &str) -> usize {
    job_id
        .trim_start_matches("batch_")
        .parse()
        .unwrap_or(usize::MAX)
}

fn output_handle(job_id: &str) -> String {
    format!("output-{}", job_id)
}

#[async_trait]
impl LlmService for MockLlm {
    async fn complete(&self, signature: &QuerySignature) -> LlmResult<String> {
        self.delay().await;
        self.record(MockLlmCall::Complete {
            user: signature.message("user").unwrap_or_default().to_string(),
        });

        {
            let mut remaining = self.rate_limits.write().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LlmError::RateLimited("mock rate limit".into()));
            }
        }

        self.response_for(signature)
            .ok_or_else(|| LlmError::service("no scripted response"))
    }

    async fn create_batch(&self, requests: &[BatchRequest]) -> LlmResult<String> {
        if self.fail_batch_creation {
            return Err(LlmError::service("mock batch creation failure"));
        }

        let job_id = {
            let mut batches = self.batches.write().unwrap();
            let job_id = format!("batch_{}", batches.len() + 1);
            batches.insert(job_id.clone(), requests.to_vec());
            job_id
        };
        self.record(MockLlmCall::CreateBatch {
            job_id: job_id.clone(),
            count: requests.len(),
        });
        Ok(job_id)
    }

    async fn batch_status(&self, job_id: &str) -> LlmResult<BatchJob> {
        self.record(MockLlmCall::BatchStatus {
            job_id: job_id.to_string(),
        });

        {
            let mut remaining = self.status_rate_limits.write().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LlmError::RateLimited("mock rate limit".into()));
            }
        }

        let status = {
            let mut statuses = self.statuses.write().unwrap();
            let next = match statuses.get_mut(job_id) {
                Some(sequence) if sequence.len() > 1 => sequence.pop_front(),
                Some(sequence) => sequence.front().copied(),
                None => None,
            };
            next.unwrap_or(BatchStatus::Completed)
        };

        let job = BatchJob::new(job_id, status);
        Ok(if status.is_success() {
            job.with_output(output_handle(job_id))
        } else {
            job
        })
    }

    async fn fetch_batch_output(&self, output_handle: &str) -> LlmResult<Vec<BatchOutput>> {
        self.delay().await;
        self.record(MockLlmCall::FetchOutput {
            handle: output_handle.to_string(),
        });

        let job_id = output_handle.trim_start_matches("output-");
        let requests = self
            .batches
            .read()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| LlmError::service(format!("unknown output {}", output_handle)))?;

        Ok(requests
            .iter()
            .map(|request| match self.response_for(&request.signature) {
                Some(response) => BatchOutput::success(&request.correlation_id, response),
                None => BatchOutput::failure(&request.correlation_id, "no scripted response"),
            })
            .collect())
    }

    async fn cancel_batch(&self, job_id: &str) -> LlmResult<()> {
        self.record(MockLlmCall::CancelBatch {
            job_id: job_id.to_string(),
        });
        Ok(())
    }
}
