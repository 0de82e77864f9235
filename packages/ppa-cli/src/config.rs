//! Environment configuration for the CLI.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use query_engine::EngineConfig;
use std::env;
use std::path::PathBuf;

/// Settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    /// Load from the environment. `cache_dir` overrides `LLM_QUERY_CACHE_DIR`.
    pub fn from_env(cache_dir: Option<PathBuf>) -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            openai_api_key: env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?,
            openai_base_url: env::var("OPENAI_BASE_URL").ok(),
            cache_dir: cache_dir.or_else(|| env::var("LLM_QUERY_CACHE_DIR").ok().map(PathBuf::from)),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        match &self.cache_dir {
            Some(dir) => EngineConfig::default().with_cache_dir(dir),
            None => EngineConfig::default(),
        }
    }
}
