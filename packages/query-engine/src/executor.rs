//! Synchronous (request/response) query execution through the cache.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::{LlmError, QueryError, Result};
use crate::recovery;
use crate::signature::{CacheKey, QuerySignature};
use crate::traits::{llm::LlmService, store::QueryCache};
use crate::types::config::RetryPolicy;

/// Answer left by the caller that held a key's slot, for the callers
/// queued behind it.
type Slot = Arc<Mutex<Option<(QuerySignature, String)>>>;

/// Runs one query at a time, serving repeats from the cache.
///
/// Concurrent calls for the same signature share one remote call: the
/// first caller queries, the rest wait on its slot and take its answer.
#[derive(Clone)]
pub struct SyncExecutor {
    store: Arc<dyn QueryCache>,
    llm: Arc<dyn LlmService>,
    retry: RetryPolicy,
    in_flight: Arc<Mutex<HashMap<CacheKey, Slot>>>,
}

impl SyncExecutor {
    pub fn new(store: Arc<dyn QueryCache>, llm: Arc<dyn LlmService>, retry: RetryPolicy) -> Self {
        Self {
            store,
            llm,
            retry,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Execute and recover a structured value.
    ///
    /// With `override_cache`, a cached answer is re-queried and the stored
    /// entry updated in place.
    pub async fn execute(&self, signature: &QuerySignature, override_cache: bool) -> Result<Value> {
        let response = self.response(signature, override_cache).await?;
        recovery::recover_value(&response)
    }

    /// Raw response text, from cache or from one remote call.
    pub async fn response(&self, signature: &QuerySignature, override_cache: bool) -> Result<String> {
        signature.validate()?;
        let hash_key = signature.cache_key();

        let slot = self.slot(&hash_key).await;
        let result = {
            let mut answer = slot.lock().await;
            let joined = match answer.as_ref() {
                Some((answered, response)) if answered == signature => Some(response.clone()),
                _ => None,
            };
            match joined {
                Some(response) => {
                    debug!(hash_key = %hash_key, "Joined in-flight query");
                    Ok(response)
                }
                None => {
                    let result = self.lookup_or_query(signature, &hash_key, override_cache).await;
                    if let Ok(response) = &result {
                        *answer = Some((signature.clone(), response.clone()));
                    }
                    result
                }
            }
        };
        drop(slot);
        self.release(&hash_key).await;
        result
    }

    async fn slot(&self, hash_key: &CacheKey) -> Slot {
        self.in_flight
            .lock()
            .await
            .entry(hash_key.clone())
            .or_default()
            .clone()
    }

    /// Forget a key's slot once no caller holds it.
    async fn release(&self, hash_key: &CacheKey) {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(hash_key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            in_flight.remove(hash_key);
        }
    }

    async fn lookup_or_query(
        &self,
        signature: &QuerySignature,
        hash_key: &CacheKey,
        override_cache: bool,
    ) -> Result<String> {
        match self.store.lookup_finished(signature).await? {
            Some(entry) if !override_cache => {
                debug!(hash_key = %hash_key, "Cache hit");
                Ok(entry.response)
            }
            Some(entry) => {
                debug!(hash_key = %hash_key, "Cache override, re-querying");
                let response = self.complete_with_retry(signature).await?;
                self.store.update_finished(&entry, &response).await?;
                Ok(response)
            }
            None => {
                debug!(hash_key = %hash_key, model = signature.model(), "Cache miss");
                let response = self.complete_with_retry(signature).await?;
                self.store.store_finished(signature, &response).await?;
                Ok(response)
            }
        }
    }

    /// One remote call, retried with a fixed wait while rate limited.
    async fn complete_with_retry(&self, signature: &QuerySignature) -> Result<String> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.llm.complete(signature).await {
                Ok(response) => return Ok(response),
                Err(LlmError::RateLimited(message)) if attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        backoff_secs = self.retry.backoff.as_secs(),
                        error = %message,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(LlmError::RateLimited(message)) => {
                    error!(attempt, error = %message, "Rate limit retries exhausted");
                    return Err(QueryError::RateLimitExhausted {
                        attempts: attempt,
                        message,
                    });
                }
                Err(LlmError::Service(source)) => return Err(QueryError::Llm(source)),
            }
        }
    }
}
