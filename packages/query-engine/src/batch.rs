//! Batch orchestration: queue, submit, await, fan results into the cache.
//!
//! Per signature the lifecycle is
//! `NEW -> ENQUEUED -> SUBMITTED -> WAITING -> RESOLVED`:
//!
//! - [`BatchOrchestrator::enqueue`] skips signatures that are finished or
//!   already pending (remembering the pending job) and dedups the queue.
//! - [`BatchOrchestrator::submit`] packages the whole queue as one remote
//!   job and records a pending entry per request.
//! - [`BatchOrchestrator::await_and_resolve`] polls waiting jobs until
//!   terminal and promotes pending entries of completed jobs.
//!
//! A job that ends in any terminal state other than `completed` promotes
//! nothing: its entries stay pending and the job is reported as failed.
//! [`BatchOrchestrator::abandon`] removes them so they can be re-enqueued.
//!
//! Every job is built for one model, so each query helper owns its own
//! orchestrator. Several orchestrators may resolve the same job at once;
//! an entry already promoted by one of them counts as resolved for all.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{LlmError, QueryError, Result};
use crate::signature::{CacheKey, QuerySignature};
use crate::traits::{llm::LlmService, store::QueryCache};
use crate::types::batch::{
    BatchJob, BatchRequest, EnqueueOutcome, JobOutcome, JobResolution, ResolveReport,
    SubmittedBatch,
};

#[derive(Default)]
struct OrchestratorState {
    queue: Vec<QuerySignature>,
    /// Queue positions by key, for duplicate checks.
    queued: HashMap<CacheKey, Vec<usize>>,
    /// Jobs this orchestrator will wait on.
    waiting: BTreeSet<String>,
}

impl OrchestratorState {
    fn is_queued(&self, key: &CacheKey, signature: &QuerySignature) -> bool {
        self.queued
            .get(key)
            .is_some_and(|slots| slots.iter().any(|&i| &self.queue[i] == signature))
    }

    fn push(&mut self, key: CacheKey, signature: QuerySignature) {
        self.queued.entry(key).or_default().push(self.queue.len());
        self.queue.push(signature);
    }

    fn take_queue(&mut self) -> Vec<QuerySignature> {
        self.queued.clear();
        std::mem::take(&mut self.queue)
    }

    fn restore_queue(&mut self, signatures: Vec<QuerySignature>) {
        let newer = self.take_queue();
        for signature in signatures.into_iter().chain(newer) {
            let key = signature.cache_key();
            if !self.is_queued(&key, &signature) {
                self.push(key, signature);
            }
        }
    }
}

/// Accumulates queries and drives them through remote batch jobs.
pub struct BatchOrchestrator {
    store: Arc<dyn QueryCache>,
    llm: Arc<dyn LlmService>,
    poll_interval: Duration,
    cancel_remote_on_abort: bool,
    state: Mutex<OrchestratorState>,
}

impl BatchOrchestrator {
    pub fn new(store: Arc<dyn QueryCache>, llm: Arc<dyn LlmService>) -> Self {
        Self {
            store,
            llm,
            poll_interval: Duration::from_secs(10),
            cancel_remote_on_abort: false,
            state: Mutex::new(OrchestratorState::default()),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Request remote cancellation when waiting is cancelled locally.
    pub fn with_cancel_remote_on_abort(mut self, cancel: bool) -> Self {
        self.cancel_remote_on_abort = cancel;
        self
    }

    /// Queue a signature for the next submission.
    pub async fn enqueue(
        &self,
        signature: QuerySignature,
        override_cache: bool,
    ) -> Result<EnqueueOutcome> {
        signature.validate()?;
        let key = signature.cache_key();

        if !override_cache && self.store.lookup_finished(&signature).await?.is_some() {
            debug!(hash_key = %key, "Already resolved, not enqueued");
            return Ok(EnqueueOutcome::AlreadyResolved);
        }

        if let Some(pending) = self.store.lookup_pending(&signature).await? {
            debug!(hash_key = %key, job_id = %pending.batch_job_id, "Already waiting");
            self.state
                .lock()
                .await
                .waiting
                .insert(pending.batch_job_id.clone());
            return Ok(EnqueueOutcome::AlreadyWaiting {
                job_id: pending.batch_job_id,
            });
        }

        let mut state = self.state.lock().await;
        if state.is_queued(&key, &signature) {
            return Ok(EnqueueOutcome::AlreadyQueued);
        }
        state.push(key, signature);
        Ok(EnqueueOutcome::Queued)
    }

    /// Submit every queued signature as one job. `None` if the queue is empty.
    pub async fn submit(&self) -> Result<Option<SubmittedBatch>> {
        let mut state = self.state.lock().await;
        let signatures = state.take_queue();
        if signatures.is_empty() {
            return Ok(None);
        }

        let requests: Vec<BatchRequest> = signatures
            .iter()
            .enumerate()
            .map(|(i, signature)| BatchRequest {
                correlation_id: format!("request-{}", i),
                signature: signature.clone(),
            })
            .collect();

        let job_id = match self.llm.create_batch(&requests).await {
            Ok(job_id) => job_id,
            Err(e) => {
                warn!(count = requests.len(), error = %e, "Batch creation failed, queue kept");
                state.restore_queue(signatures);
                return Err(e.into());
            }
        };

        // The queue is not restored: resubmitting would pay for the job twice.
        if let Err(e) = self.store.store_pending_many(&job_id, &requests).await {
            error!(
                job_id = %job_id,
                count = requests.len(),
                error = %e,
                "Batch created but pending entries not recorded, cancelling it"
            );
            if let Err(cancel_error) = self.llm.cancel_batch(&job_id).await {
                warn!(job_id = %job_id, error = %cancel_error, "Remote batch cancellation failed");
            }
            return Err(QueryError::BatchUnrecorded {
                job_id,
                source: Box::new(e),
            });
        }

        state.waiting.insert(job_id.clone());
        info!(job_id = %job_id, count = requests.len(), "Submitted batch");

        Ok(Some(SubmittedBatch {
            job_id,
            count: requests.len(),
        }))
    }

    /// Wait for one job (or every waiting job) and fan results in.
    ///
    /// See [`await_jobs`](Self::await_jobs).
    pub async fn await_and_resolve(
        &self,
        job_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResolveReport> {
        let jobs: Vec<String> = match job_id {
            Some(id) => vec![id.to_string()],
            None => self.state.lock().await.waiting.iter().cloned().collect(),
        };
        self.await_jobs(&jobs, cancel).await
    }

    /// Wait for the given jobs concurrently and fan results in.
    ///
    /// Each job that reaches a terminal state leaves the waiting set.
    /// Failed jobs, and jobs whose results could not be fanned in, are
    /// reported per job in the returned [`ResolveReport`] next to the jobs
    /// that completed (see [`ResolveReport::into_result`]). Cancelling
    /// `cancel` stops polling and returns [`QueryError::Cancelled`].
    pub async fn await_jobs(
        &self,
        job_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<ResolveReport> {
        let results =
            futures::future::join_all(job_ids.iter().map(|id| self.await_job(id, cancel))).await;

        let mut report = ResolveReport::default();
        let mut cancelled = false;
        {
            let mut state = self.state.lock().await;
            for (job_id, result) in job_ids.iter().zip(results) {
                match result {
                    Ok(outcome) => {
                        state.waiting.remove(&outcome.job_id);
                        report.outcomes.push(outcome);
                    }
                    Err(QueryError::Cancelled) => cancelled = true,
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "Batch job not resolved");
                        report.outcomes.push(JobOutcome {
                            job_id: job_id.clone(),
                            resolution: JobResolution::Errored {
                                reason: e.to_string(),
                            },
                        });
                    }
                }
            }
        }

        if cancelled {
            return Err(QueryError::Cancelled);
        }

        info!(
            jobs = report.outcomes.len(),
            resolved = report.resolved(),
            still_pending = report.still_pending(),
            failed = report.failed().count(),
            errored = report.errored().count(),
            "Batch resolution finished"
        );
        Ok(report)
    }

    /// Wait on every job that still owns pending entries in the cache.
    ///
    /// Returns how many job ids were loaded.
    pub async fn resume(&self) -> Result<usize> {
        let ids = self.store.pending_job_ids().await?;
        let mut state = self.state.lock().await;
        state.waiting.extend(ids.iter().cloned());
        info!(count = ids.len(), "Resumed pending batch jobs");
        Ok(ids.len())
    }

    /// Forget a job and delete its pending entries.
    pub async fn abandon(&self, job_id: &str) -> Result<usize> {
        let removed = self.store.delete_pending_by_job(job_id).await?;
        self.state.lock().await.waiting.remove(job_id);
        info!(job_id, count = removed, "Abandoned batch job");
        Ok(removed)
    }

    /// Jobs currently awaited, sorted.
    pub async fn waiting_jobs(&self) -> Vec<String> {
        self.state.lock().await.waiting.iter().cloned().collect()
    }

    /// Signatures queued for the next submission.
    pub async fn queued_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    async fn await_job(&self, job_id: &str, cancel: &CancellationToken) -> Result<JobOutcome> {
        let job = self.poll_until_terminal(job_id, cancel).await?;
        let resolution = self.resolve_job(&job).await?;
        Ok(JobOutcome {
            job_id: job.id,
            resolution,
        })
    }

    async fn poll_until_terminal(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchJob> {
        loop {
            let status = tokio::select! {
                status = self.llm.batch_status(job_id) => status,
                _ = cancel.cancelled() => return Err(self.abort(job_id).await),
            };

            match status {
                Ok(job) if !job.status.is_pending() => return Ok(job),
                Ok(job) => debug!(job_id, status = %job.status, "Batch still running"),
                Err(LlmError::RateLimited(message)) => {
                    warn!(job_id, error = %message, "Rate limited while polling batch")
                }
                Err(e) => return Err(e.into()),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => return Err(self.abort(job_id).await),
            }
        }
    }

    async fn abort(&self, job_id: &str) -> QueryError {
        if self.cancel_remote_on_abort {
            match self.llm.cancel_batch(job_id).await {
                Ok(()) => info!(job_id, "Requested remote batch cancellation"),
                Err(e) => warn!(job_id, error = %e, "Remote batch cancellation failed"),
            }
        }
        QueryError::Cancelled
    }

    async fn resolve_job(&self, job: &BatchJob) -> Result<JobResolution> {
        let pending = self.store.lookup_pending_by_job(&job.id).await?;

        if !job.status.is_success() {
            warn!(
                job_id = %job.id,
                status = %job.status,
                still_pending = pending.len(),
                "Batch job did not complete, entries left pending"
            );
            return Ok(JobResolution::Failed {
                status: job.status,
                still_pending: pending.len(),
            });
        }

        let outputs = match &job.output_handle {
            Some(handle) => self.llm.fetch_batch_output(handle).await?,
            None => {
                warn!(job_id = %job.id, "Completed batch has no output");
                Vec::new()
            }
        };
        let mut by_id: HashMap<String, std::result::Result<String, String>> = outputs
            .into_iter()
            .map(|o| (o.correlation_id, o.result))
            .collect();

        let mut resolved = 0;
        let mut missing = 0;
        let mut first_error = None;
        for entry in &pending {
            match by_id.remove(&entry.correlation_id) {
                Some(Ok(response)) => match self.store.promote(entry, &response).await {
                    Ok(Some(_)) => resolved += 1,
                    Ok(None) => {
                        debug!(
                            job_id = %job.id,
                            correlation_id = %entry.correlation_id,
                            "Entry already promoted"
                        );
                        resolved += 1;
                    }
                    Err(e) => {
                        error!(
                            job_id = %job.id,
                            correlation_id = %entry.correlation_id,
                            error = %e,
                            "Promotion failed, entry left pending"
                        );
                        first_error.get_or_insert(e);
                    }
                },
                Some(Err(reason)) => {
                    warn!(
                        job_id = %job.id,
                        correlation_id = %entry.correlation_id,
                        error = %reason,
                        "Batch request failed, entry left pending"
                    );
                    missing += 1;
                }
                None => {
                    warn!(
                        job_id = %job.id,
                        correlation_id = %entry.correlation_id,
                        "No batch result for request, entry left pending"
                    );
                    missing += 1;
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(job_id = %job.id, resolved, missing, "Resolved batch job");
        Ok(JobResolution::Completed { resolved, missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SamplingParams;
    use crate::stores::MemoryStore;
    use crate::testing::MockLlm;
    use crate::types::batch::BatchStatus;
    use crate::types::entry::{CacheStats, FinishedQuery, PendingQuery};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Memory store whose next `store_pending_many` calls fail.
    struct UnrecordableStore {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    impl UnrecordableStore {
        fn failing(times: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures: AtomicU32::new(times),
            }
        }
    }

    #[async_trait]
    impl QueryCache for UnrecordableStore {
        async fn lookup_finished(&self, signature: &QuerySignature) -> Result<Option<FinishedQuery>> {
            self.inner.lookup_finished(signature).await
        }

        async fn store_finished(
            &self,
            signature: &QuerySignature,
            response: &str,
        ) -> Result<FinishedQuery> {
            self.inner.store_finished(signature, response).await
        }

        async fn update_finished(&self, entry: &FinishedQuery, response: &str) -> Result<FinishedQuery> {
            self.inner.update_finished(entry, response).await
        }

        async fn lookup_pending(&self, signature: &QuerySignature) -> Result<Option<PendingQuery>> {
            self.inner.lookup_pending(signature).await
        }

        async fn lookup_pending_by_job(&self, job_id: &str) -> Result<Vec<PendingQuery>> {
            self.inner.lookup_pending_by_job(job_id).await
        }

        async fn store_pending(
            &self,
            signature: &QuerySignature,
            job_id: &str,
            correlation_id: &str,
        ) -> Result<PendingQuery> {
            self.inner.store_pending(signature, job_id, correlation_id).await
        }

        async fn store_pending_many(&self, job_id: &str, requests: &[BatchRequest]) -> Result<()> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(QueryError::Storage("disk full".into()));
            }
            self.inner.store_pending_many(job_id, requests).await
        }

        async fn promote(
            &self,
            pending: &PendingQuery,
            response: &str,
        ) -> Result<Option<FinishedQuery>> {
            self.inner.promote(pending, response).await
        }

        async fn delete_pending_by_job(&self, job_id: &str) -> Result<usize> {
            self.inner.delete_pending_by_job(job_id).await
        }

        async fn pending_job_ids(&self) -> Result<Vec<String>> {
            self.inner.pending_job_ids().await
        }

        async fn stats(&self) -> Result<CacheStats> {
            self.inner.stats().await
        }
    }

    fn signature(user: &str) -> QuerySignature {
        QuerySignature::new("gpt-4o", SamplingParams::default(), "system", user)
    }

    fn orchestrator(store: Arc<MemoryStore>, llm: Arc<MockLlm>) -> BatchOrchestrator {
        BatchOrchestrator::new(store, llm).with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_packages_once() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(MockLlm::new());
        let batch = orchestrator(store.clone(), llm.clone());

        assert_eq!(batch.enqueue(signature("a"), false).await.unwrap(), EnqueueOutcome::Queued);
        assert_eq!(
            batch.enqueue(signature("a"), false).await.unwrap(),
            EnqueueOutcome::AlreadyQueued
        );
        batch.enqueue(signature("b"), false).await.unwrap();

        let submitted = batch.submit().await.unwrap().unwrap();
        assert_eq!(submitted.count, 2);
        assert_eq!(llm.submitted_batches()[0].len(), 2);
        assert_eq!(store.pending_count().await, 2);
        assert_eq!(batch.waiting_jobs().await, vec![submitted.job_id]);

        // Queue is cleared.
        assert!(batch.submit().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_correlation_ids_are_positional() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(MockLlm::new());
        let batch = orchestrator(store.clone(), llm.clone());

        for user in ["a", "b", "c"] {
            batch.enqueue(signature(user), false).await.unwrap();
        }
        let submitted = batch.submit().await.unwrap().unwrap();

        let entries = store.lookup_pending_by_job(&submitted.job_id).await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.correlation_id.as_str()).collect();
        assert_eq!(ids, vec!["request-0", "request-1", "request-2"]);
    }

    #[tokio::test]
    async fn test_pending_signature_is_not_resubmitted() {
        let store = Arc::new(MemoryStore::new());
        store.store_pending(&signature("a"), "batch_old", "request-0").await.unwrap();
        let llm = Arc::new(MockLlm::new());
        let batch = orchestrator(store.clone(), llm.clone());

        assert_eq!(
            batch.enqueue(signature("a"), false).await.unwrap(),
            EnqueueOutcome::AlreadyWaiting {
                job_id: "batch_old".into()
            }
        );
        assert!(batch.submit().await.unwrap().is_none());
        assert_eq!(batch.waiting_jobs().await, vec!["batch_old"]);
    }

    #[tokio::test]
    async fn test_failed_creation_keeps_queue() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(MockLlm::new().with_failing_batch_creation());
        let batch = orchestrator(store.clone(), llm.clone());

        batch.enqueue(signature("a"), false).await.unwrap();
        assert!(batch.submit().await.is_err());
        assert_eq!(batch.queued_len().await, 1);
        assert_eq!(store.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unrecorded_job_is_cancelled_not_resubmitted() {
        let store = Arc::new(UnrecordableStore::failing(1));
        let llm = Arc::new(MockLlm::new());
        let batch =
            BatchOrchestrator::new(store.clone(), llm.clone()).with_poll_interval(Duration::from_millis(1));

        batch.enqueue(signature("a"), false).await.unwrap();
        match batch.submit().await {
            Err(QueryError::BatchUnrecorded { job_id, .. }) => assert_eq!(job_id, "batch_1"),
            other => panic!("expected BatchUnrecorded, got {:?}", other),
        }

        assert_eq!(llm.cancelled_batches(), vec!["batch_1"]);
        assert_eq!(batch.queued_len().await, 0);
        assert!(batch.waiting_jobs().await.is_empty());

        // Nothing left to pay for a second time.
        assert!(batch.submit().await.unwrap().is_none());
        assert_eq!(llm.submitted_batches().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_job_promotes_entries() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(MockLlm::new().with_response("a", "[\"email\"]"));
        let batch = orchestrator(store.clone(), llm.clone());

        batch.enqueue(signature("a"), false).await.unwrap();
        batch.enqueue(signature("b"), false).await.unwrap();
        let submitted = batch.submit().await.unwrap().unwrap();
        llm.set_batch_statuses(
            &submitted.job_id,
            vec![BatchStatus::Validating, BatchStatus::InProgress, BatchStatus::Completed],
        );

        let report = batch
            .await_and_resolve(None, &CancellationToken::new())
            .await
            .unwrap();

        // "b" has no scripted response, so its line is an error.
        assert_eq!(
            report.outcomes[0].resolution,
            JobResolution::Completed {
                resolved: 1,
                missing: 1
            }
        );
        assert!(store.lookup_finished(&signature("a")).await.unwrap().is_some());
        assert!(store.lookup_pending(&signature("a")).await.unwrap().is_none());
        assert!(store.lookup_pending(&signature("b")).await.unwrap().is_some());
        assert!(batch.waiting_jobs().await.is_empty());
        assert_eq!(llm.status_polls(&submitted.job_id), 3);
    }

    #[tokio::test]
    async fn test_concurrent_resolvers_of_one_job() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(
            MockLlm::new()
                .with_default_response("[\"email\"]")
                .with_latency(Duration::from_millis(20)),
        );
        let first = orchestrator(store.clone(), llm.clone());
        let second = orchestrator(store.clone(), llm.clone());

        for user in ["a", "b", "c"] {
            first.enqueue(signature(user), false).await.unwrap();
        }
        let submitted = first.submit().await.unwrap().unwrap();

        // Both read the pending entries before either promotes.
        let cancel = CancellationToken::new();
        let (a, b) = tokio::join!(
            first.await_and_resolve(Some(submitted.job_id.as_str()), &cancel),
            second.await_and_resolve(Some(submitted.job_id.as_str()), &cancel),
        );

        for report in [a.unwrap(), b.unwrap()] {
            assert_eq!(
                report.outcomes[0].resolution,
                JobResolution::Completed {
                    resolved: 3,
                    missing: 0
                }
            );
        }
        assert_eq!(store.finished_count().await, 3);
        assert_eq!(store.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_poll_keeps_polling() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(
            MockLlm::new()
                .with_default_response("[1]")
                .with_status_rate_limits(2),
        );
        let batch = orchestrator(store.clone(), llm.clone());

        batch.enqueue(signature("a"), false).await.unwrap();
        let submitted = batch.submit().await.unwrap().unwrap();

        let report = batch
            .await_and_resolve(None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.resolved(), 1);
        assert_eq!(llm.status_polls(&submitted.job_id), 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_polling() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(MockLlm::new());
        let batch = BatchOrchestrator::new(store.clone(), llm.clone())
            .with_poll_interval(Duration::from_secs(3600))
            .with_cancel_remote_on_abort(true);

        batch.enqueue(signature("a"), false).await.unwrap();
        let submitted = batch.submit().await.unwrap().unwrap();
        llm.set_batch_statuses(&submitted.job_id, vec![BatchStatus::InProgress]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = batch.await_and_resolve(None, &cancel).await;
        assert!(matches!(result, Err(QueryError::Cancelled)));
        assert_eq!(llm.cancelled_batches(), vec![submitted.job_id.clone()]);
        // Still waiting locally; can be resumed later.
        assert_eq!(batch.waiting_jobs().await, vec![submitted.job_id]);
        assert_eq!(store.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_resume_and_abandon() {
        let store = Arc::new(MemoryStore::new());
        store.store_pending(&signature("a"), "batch_1", "request-0").await.unwrap();
        store.store_pending(&signature("b"), "batch_2", "request-0").await.unwrap();
        let llm = Arc::new(MockLlm::new());
        let batch = orchestrator(store.clone(), llm);

        assert_eq!(batch.resume().await.unwrap(), 2);
        assert_eq!(batch.waiting_jobs().await, vec!["batch_1", "batch_2"]);

        assert_eq!(batch.abandon("batch_1").await.unwrap(), 1);
        assert_eq!(batch.waiting_jobs().await, vec!["batch_2"]);
        assert_eq!(
            batch.enqueue(signature("a"), false).await.unwrap(),
            EnqueueOutcome::Queued
        );
    }
}
