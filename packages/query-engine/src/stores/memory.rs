//! In-memory cache for testing and cache-less runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

use crate::error::{QueryError, Result};
use crate::signature::{CacheKey, QuerySignature};
use crate::traits::store::QueryCache;
use crate::types::batch::BatchRequest;
use crate::types::entry::{CacheStats, FinishedQuery, PendingQuery};

#[derive(Default)]
struct MemoryState {
    finished: HashMap<CacheKey, Vec<FinishedQuery>>,
    pending: HashMap<CacheKey, Vec<PendingQuery>>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_pending(
        &mut self,
        hash_key: CacheKey,
        signature: &QuerySignature,
        job_id: &str,
        correlation_id: &str,
    ) -> PendingQuery {
        let entry = PendingQuery {
            id: self.next_id(),
            hash_key: hash_key.clone(),
            signature: signature.clone(),
            batch_job_id: job_id.to_string(),
            correlation_id: correlation_id.to_string(),
            timestamp: Utc::now(),
        };
        self.pending.entry(hash_key).or_default().push(entry.clone());
        entry
    }
}

/// In-memory query cache.
///
/// All tables sit behind one lock, so every mutation (including
/// [`promote`](QueryCache::promote)) is atomic. Data is lost on drop.
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    key_fn: fn(&QuerySignature) -> CacheKey,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_key_fn(CacheKey::of)
    }

    /// Use a custom key function. Tests use a constant one to force
    /// every signature into the same bucket.
    pub fn with_key_fn(key_fn: fn(&QuerySignature) -> CacheKey) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            key_fn,
        }
    }

    pub async fn finished_count(&self) -> usize {
        self.state.read().await.finished.values().map(Vec::len).sum()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.read().await.pending.values().map(Vec::len).sum()
    }

    fn key(&self, signature: &QuerySignature) -> CacheKey {
        (self.key_fn)(signature)
    }
}

#[async_trait]
impl QueryCache for MemoryStore {
    async fn lookup_finished(&self, signature: &QuerySignature) -> Result<Option<FinishedQuery>> {
        let state = self.state.read().await;
        Ok(state
            .finished
            .get(&self.key(signature))
            .and_then(|bucket| bucket.iter().find(|e| &e.signature == signature))
            .cloned())
    }

    async fn store_finished(
        &self,
        signature: &QuerySignature,
        response: &str,
    ) -> Result<FinishedQuery> {
        let hash_key = self.key(signature);
        let mut state = self.state.write().await;
        let entry = FinishedQuery {
            id: state.next_id(),
            hash_key: hash_key.clone(),
            signature: signature.clone(),
            response: response.to_string(),
            timestamp: Utc::now(),
        };
        state.finished.entry(hash_key).or_default().push(entry.clone());
        Ok(entry)
    }

    async fn update_finished(&self, entry: &FinishedQuery, response: &str) -> Result<FinishedQuery> {
        let mut state = self.state.write().await;
        let stored = state
            .finished
            .get_mut(&entry.hash_key)
            .and_then(|bucket| bucket.iter_mut().find(|e| e.id == entry.id))
            .ok_or_else(|| {
                QueryError::Storage(format!("finished entry {} not found", entry.id).into())
            })?;

        stored.response = response.to_string();
        stored.timestamp = Utc::now();
        Ok(stored.clone())
    }

    async fn lookup_pending(&self, signature: &QuerySignature) -> Result<Option<PendingQuery>> {
        let state = self.state.read().await;
        Ok(state
            .pending
            .get(&self.key(signature))
            .and_then(|bucket| bucket.iter().find(|e| &e.signature == signature))
            .cloned())
    }

    async fn lookup_pending_by_job(&self, job_id: &str) -> Result<Vec<PendingQuery>> {
        let state = self.state.read().await;
        let mut entries: Vec<PendingQuery> = state
            .pending
            .values()
            .flatten()
            .filter(|e| e.batch_job_id == job_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn store_pending(
        &self,
        signature: &QuerySignature,
        job_id: &str,
        correlation_id: &str,
    ) -> Result<PendingQuery> {
        let hash_key = self.key(signature);
        let mut state = self.state.write().await;
        Ok(state.insert_pending(hash_key, signature, job_id, correlation_id))
    }

    async fn store_pending_many(&self, job_id: &str, requests: &[BatchRequest]) -> Result<()> {
        let mut state = self.state.write().await;
        for request in requests {
            let hash_key = self.key(&request.signature);
            state.insert_pending(hash_key, &request.signature, job_id, &request.correlation_id);
        }
        Ok(())
    }

    async fn promote(
        &self,
        pending: &PendingQuery,
        response: &str,
    ) -> Result<Option<FinishedQuery>> {
        let mut state = self.state.write().await;

        let Some(bucket) = state.pending.get_mut(&pending.hash_key) else {
            return Ok(None);
        };
        let Some(position) = bucket.iter().position(|e| e.id == pending.id) else {
            return Ok(None);
        };
        let removed = bucket.remove(position);
        if bucket.is_empty() {
            state.pending.remove(&pending.hash_key);
        }

        let now = Utc::now();
        if let Some(existing) = state
            .finished
            .get_mut(&removed.hash_key)
            .and_then(|bucket| bucket.iter_mut().find(|e| e.signature == removed.signature))
        {
            existing.response = response.to_string();
            existing.timestamp = now;
            return Ok(Some(existing.clone()));
        }

        let entry = FinishedQuery {
            id: state.next_id(),
            hash_key: removed.hash_key.clone(),
            signature: removed.signature,
            response: response.to_string(),
            timestamp: now,
        };
        state
            .finished
            .entry(removed.hash_key)
            .or_default()
            .push(entry.clone());
        Ok(Some(entry))
    }

    async fn delete_pending_by_job(&self, job_id: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut removed = 0;
        state.pending.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|e| e.batch_job_id != job_id);
            removed += before - bucket.len();
            !bucket.is_empty()
        });
        Ok(removed)
    }

    async fn pending_job_ids(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let ids: BTreeSet<&str> = state
            .pending
            .values()
            .flatten()
            .map(|e| e.batch_job_id.as_str())
            .collect();
        Ok(ids.into_iter().map(str::to_string).collect())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let pending_jobs = self.pending_job_ids().await?;
        let state = self.state.read().await;
        Ok(CacheStats {
            finished: state.finished.values().map(Vec::len).sum(),
            pending: state.pending.values().map(Vec::len).sum(),
            pending_jobs,
        })
    }
}
