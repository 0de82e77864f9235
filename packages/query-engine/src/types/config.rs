//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::signature::SamplingParams;

/// File name of the cache database inside the cache directory.
pub const DEFAULT_CACHE_FILE: &str = "llm_query_cache.sqlite";

/// Retry policy for rate-limited synchronous calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Fixed wait between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(90),
        }
    }
}

/// Configuration for a [`QueryEngine`](crate::helper::QueryEngine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the cache database.
    ///
    /// If None, the engine keeps its cache in memory.
    pub cache_dir: Option<PathBuf>,

    /// Database file name inside `cache_dir`.
    ///
    /// Default: `llm_query_cache.sqlite`.
    pub cache_file: String,

    pub retry: RetryPolicy,

    /// How often a waiting batch job is polled.
    ///
    /// Default: 10 seconds.
    pub poll_interval: Duration,

    /// Sampling parameters for every signature built by a helper.
    pub sampling: SamplingParams,

    /// Queries in flight at once when a stage runs synchronously.
    ///
    /// Default: 8.
    pub concurrency: usize,

    /// Ask the service to cancel a job when local waiting is cancelled.
    ///
    /// Default: false (the job keeps running remotely and can be resumed).
    pub cancel_remote_on_abort: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            cache_file: DEFAULT_CACHE_FILE.to_string(),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(10),
            sampling: SamplingParams::default(),
            concurrency: 8,
            cancel_remote_on_abort: false,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the cache database in `dir`.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_cache_file(mut self, name: impl Into<String>) -> Self {
        self.cache_file = name.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Set stage fan-out width (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancel_remote_on_abort(mut self, cancel: bool) -> Self {
        self.cancel_remote_on_abort = cancel;
        self
    }

    /// Path of the cache database, if a directory is configured.
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache_dir.as_deref().map(|dir| dir.join(&self.cache_file))
    }

    /// SQLite connection URL for the cache, created on first open.
    pub fn database_url(&self) -> Option<String> {
        self.cache_path().map(|path| sqlite_url(&path))
    }
}

fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff, Duration::from_secs(90));
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.sampling.seed, 10000);
        assert!(config.database_url().is_none());
    }

    #[test]
    fn test_database_url_resolves_from_dir() {
        let config = EngineConfig::new().with_cache_dir("/tmp/ppa");
        assert_eq!(
            config.database_url().as_deref(),
            Some("sqlite:///tmp/ppa/llm_query_cache.sqlite?mode=rwc")
        );
    }

    #[test]
    fn test_concurrency_floor() {
        assert_eq!(EngineConfig::new().with_concurrency(0).concurrency, 1);
    }
}
