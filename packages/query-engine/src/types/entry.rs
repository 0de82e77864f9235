//! Persisted cache records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signature::{CacheKey, QuerySignature};

/// A query whose response has been received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedQuery {
    /// Store-assigned row id.
    pub id: i64,
    pub hash_key: CacheKey,
    pub signature: QuerySignature,
    /// Raw response text, exactly as the model returned it.
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

/// A query submitted in a batch job that has not been answered yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQuery {
    /// Store-assigned row id.
    pub id: i64,
    pub hash_key: CacheKey,
    pub signature: QuerySignature,
    pub batch_job_id: String,
    /// Unique within `batch_job_id`.
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Entry counts reported by a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub finished: usize,
    pub pending: usize,
    /// Distinct job ids that still own pending entries, sorted.
    pub pending_jobs: Vec<String>,
}
