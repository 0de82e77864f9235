//! Batch job types.
//!
//! These are provider-neutral: an [`LlmService`](crate::traits::llm::LlmService)
//! implementation maps its own job representation onto them.

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};
use crate::signature::QuerySignature;

/// Remote batch job status.
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
    /// Non-terminal: the job must be polled again.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::Validating | Self::InProgress | Self::Finalizing | Self::Cancelling
        )
    }

    /// The only terminal state whose output is trusted.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

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

/// Snapshot of a remote job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub status: BatchStatus,
    /// Handle for fetching results. Only meaningful once completed.
    pub output_handle: Option<String>,
}

impl BatchJob {
    pub fn new(id: impl Into<String>, status: BatchStatus) -> Self {
        Self {
            id: id.into(),
            status,
            output_handle: None,
        }
    }

    pub fn with_output(mut self, handle: impl Into<String>) -> Self {
        self.output_handle = Some(handle.into());
        self
    }
}

/// One request packaged into a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub correlation_id: String,
    pub signature: QuerySignature,
}

/// One result line of a finished batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutput {
    pub correlation_id: String,
    /// Response text, or the per-request error reported by the service.
    pub result: std::result::Result<String, String>,
}

impl BatchOutput {
    pub fn success(correlation_id: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            result: Ok(response.into()),
        }
    }

    pub fn failure(correlation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            result: Err(error.into()),
        }
    }
}

/// What `enqueue` did with a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A finished entry exists; nothing to do.
    AlreadyResolved,
    /// Pending under an earlier submission; that job is now awaited.
    AlreadyWaiting { job_id: String },
    /// An equal signature is already in the submission queue.
    AlreadyQueued,
    /// Added to the submission queue.
    Queued,
}

/// Result of a successful `submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedBatch {
    pub job_id: String,
    pub count: usize,
}

/// How one awaited job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobResolution {
    /// Every matching entry with a result line was promoted.
    Completed { resolved: usize, missing: usize },
    /// Terminal non-success state. Entries stay pending.
    Failed {
        status: BatchStatus,
        still_pending: usize,
    },
    /// Polling, download or promotion failed. The job stays awaited.
    Errored { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    #[serde(flatten)]
    pub resolution: JobResolution,
}

/// Per-job results of `await_and_resolve`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveReport {
    pub outcomes: Vec<JobOutcome>,
}

impl ResolveReport {
    /// Entries promoted across all jobs.
    pub fn resolved(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o.resolution {
                JobResolution::Completed { resolved, .. } => resolved,
                JobResolution::Failed { .. } | JobResolution::Errored { .. } => 0,
            })
            .sum()
    }

    /// Entries known to be left pending, from missing lines or failed jobs.
    pub fn still_pending(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o.resolution {
                JobResolution::Completed { missing, .. } => missing,
                JobResolution::Failed { still_pending, .. } => still_pending,
                JobResolution::Errored { .. } => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.resolution, JobResolution::Failed { .. }))
    }

    pub fn errored(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.resolution, JobResolution::Errored { .. }))
    }

    /// Turn the first job that did not complete into an error:
    /// [`QueryError::BatchFailed`] or [`QueryError::BatchResolution`].
    pub fn into_result(self) -> Result<Self> {
        for outcome in &self.outcomes {
            match &outcome.resolution {
                JobResolution::Completed { .. } => {}
                JobResolution::Failed { status, .. } => {
                    return Err(QueryError::BatchFailed {
                        job_id: outcome.job_id.clone(),
                        status: *status,
                    })
                }
                JobResolution::Errored { reason } => {
                    return Err(QueryError::BatchResolution {
                        job_id: outcome.job_id.clone(),
                        reason: reason.clone(),
                    })
                }
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_and_success_sets() {
        for status in [
            BatchStatus::Validating,
            BatchStatus::InProgress,
            BatchStatus::Finalizing,
            BatchStatus::Cancelling,
        ] {
            assert!(status.is_pending());
            assert!(!status.is_success());
        }
        for status in [BatchStatus::Failed, BatchStatus::Expired, BatchStatus::Cancelled] {
            assert!(!status.is_pending());
            assert!(!status.is_success());
        }
        assert!(BatchStatus::Completed.is_success());
    }

    #[test]
    fn test_report_surfaces_failure() {
        let report = ResolveReport {
            outcomes: vec![
                JobOutcome {
                    job_id: "batch_ok".into(),
                    resolution: JobResolution::Completed {
                        resolved: 3,
                        missing: 1,
                    },
                },
                JobOutcome {
                    job_id: "batch_expired".into(),
                    resolution: JobResolution::Failed {
                        status: BatchStatus::Expired,
                        still_pending: 2,
                    },
                },
            ],
        };

        assert_eq!(report.resolved(), 3);
        assert_eq!(report.still_pending(), 3);

        match report.into_result() {
            Err(QueryError::BatchFailed { job_id, status }) => {
                assert_eq!(job_id, "batch_expired");
                assert_eq!(status, BatchStatus::Expired);
            }
            other => panic!("expected BatchFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_report_keeps_completed_jobs_next_to_errors() {
        let report = ResolveReport {
            outcomes: vec![
                JobOutcome {
                    job_id: "batch_ok".into(),
                    resolution: JobResolution::Completed {
                        resolved: 2,
                        missing: 0,
                    },
                },
                JobOutcome {
                    job_id: "batch_broken".into(),
                    resolution: JobResolution::Errored {
                        reason: "storage error: disk full".into(),
                    },
                },
            ],
        };

        assert_eq!(report.resolved(), 2);
        assert_eq!(report.errored().count(), 1);
        assert_eq!(report.failed().count(), 0);
        assert!(matches!(
            report.into_result(),
            Err(QueryError::BatchResolution { job_id, .. }) if job_id == "batch_broken"
        ));
    }

    #[test]
    fn test_report_serializes_flat() {
        let outcome = JobOutcome {
            job_id: "batch_1".into(),
            resolution: JobResolution::Completed {
                resolved: 2,
                missing: 0,
            },
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "completed");
        assert_eq!(value["resolved"], 2);
        assert_eq!(value["job_id"], "batch_1");
    }
}
