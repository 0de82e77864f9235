//! Cache storage trait.
//!
//! A store holds two tables: finished queries (signature + response) and
//! pending batch queries (signature + job id + correlation id). Both are
//! indexed by [`CacheKey`](crate::signature::CacheKey) only; every lookup
//! must confirm a match by full signature equality, since distinct
//! signatures may share a key.

use async_trait::async_trait;

use crate::error::Result;
use crate::signature::QuerySignature;
use crate::types::batch::BatchRequest;
use crate::types::entry::{CacheStats, FinishedQuery, PendingQuery};

/// Persistent cache of finished and pending queries.
///
/// Each mutation is atomic on its own. Mutations of distinct signatures
/// are not ordered against each other.
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Finished entry whose signature equals `signature`.
    async fn lookup_finished(&self, signature: &QuerySignature) -> Result<Option<FinishedQuery>>;

    /// Insert a finished entry.
    ///
    /// Does not check for an existing one; callers look up first and use
    /// [`update_finished`](Self::update_finished) instead when one exists.
    async fn store_finished(&self, signature: &QuerySignature, response: &str)
        -> Result<FinishedQuery>;

    /// Overwrite the response of an existing entry and refresh its timestamp.
    async fn update_finished(&self, entry: &FinishedQuery, response: &str) -> Result<FinishedQuery>;

    /// Pending entry whose signature equals `signature`.
    async fn lookup_pending(&self, signature: &QuerySignature) -> Result<Option<PendingQuery>>;

    /// Every pending entry owned by a job.
    async fn lookup_pending_by_job(&self, job_id: &str) -> Result<Vec<PendingQuery>>;

    /// Record a submitted query.
    async fn store_pending(
        &self,
        signature: &QuerySignature,
        job_id: &str,
        correlation_id: &str,
    ) -> Result<PendingQuery>;

    /// Record every request of a freshly created job.
    async fn store_pending_many(&self, job_id: &str, requests: &[BatchRequest]) -> Result<()> {
        for request in requests {
            self.store_pending(&request.signature, job_id, &request.correlation_id)
                .await?;
        }
        Ok(())
    }

    /// Replace a pending entry with a finished one carrying `response`.
    ///
    /// Atomic: afterwards the signature has exactly one finished entry and
    /// no pending entry. An existing finished entry for the same signature
    /// is updated rather than duplicated.
    ///
    /// `None` when the pending entry is already gone, e.g. promoted by a
    /// concurrent resolver of the same job.
    async fn promote(&self, pending: &PendingQuery, response: &str)
        -> Result<Option<FinishedQuery>>;

    /// Drop every pending entry of a job. Returns how many were removed.
    async fn delete_pending_by_job(&self, job_id: &str) -> Result<usize>;

    /// Distinct job ids that still own pending entries, sorted.
    async fn pending_job_ids(&self) -> Result<Vec<String>>;

    /// Entry counts.
    async fn stats(&self) -> Result<CacheStats>;
}
