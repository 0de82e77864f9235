//! LLM Query Engine
//!
//! Deduplicated, persistently cached execution of LLM queries for
//! multi-stage extraction pipelines, with recovery of structured values
//! from loosely formatted model output.
//!
//! # Design
//!
//! - A query is identified by its full signature (model, sampling
//!   parameters, messages); identical signatures never hit the service twice
//! - Raw responses are cached, never the recovered value
//! - The same query runs synchronously or through an asynchronous batch job
//! - A crash between submission and resolution loses nothing: pending
//!   entries are persisted and can be resumed
//!
//! # Usage
//!
//! ```rust,ignore
//! use query_engine::{EngineConfig, OverrideScope, QueryCategory, QueryEngine, QueryMode};
//! use query_engine::testing::MockLlm;
//!
//! let llm = Arc::new(MockLlm::new().with_default_response("[\"email\"]"));
//! let engine = QueryEngine::open(EngineConfig::default(), llm).await?;
//!
//! let helper = engine
//!     .helper(QueryCategory::DataEntity, system_prompt, "Sentence: {sentence}", "gpt-4o")
//!     .with_alias("sentence", "segment");
//!
//! let entities = helper
//!     .run_query(&fields, &OverrideScope::None, QueryMode::Sync)
//!     .await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (LlmService, QueryCache)
//! - [`types`] - Cache entries, batch types, configuration
//! - [`signature`] - Query signatures and cache keys
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`recovery`] - Structured-value recovery from model output
//! - [`executor`] - Synchronous execution with rate-limit retry
//! - [`batch`] - Batch job orchestration
//! - [`helper`] - Query helpers and the engine facade
//! - [`testing`] - Mock implementations for testing

pub mod batch;
pub mod error;
pub mod executor;
pub mod helper;
pub mod recovery;
pub mod signature;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

#[cfg(feature = "openai")]
pub mod ai;

// Re-export core types at crate root
pub use error::{LlmError, QueryError, Result};
pub use traits::{llm::LlmService, store::QueryCache};
pub use types::{
    batch::{
        BatchJob, BatchOutput, BatchRequest, BatchStatus, EnqueueOutcome, JobOutcome,
        JobResolution, ResolveReport, SubmittedBatch,
    },
    config::{EngineConfig, RetryPolicy, DEFAULT_CACHE_FILE},
    entry::{CacheStats, FinishedQuery, PendingQuery},
};

pub use batch::BatchOrchestrator;
pub use executor::SyncExecutor;
pub use helper::{
    Fields, OverrideScope, PostParse, PromptTemplate, QueryCategory, QueryEngine, QueryHelper,
    QueryMode,
};
pub use recovery::{recover, recover_value, Recovered, RecoveryFailure, RecoveryStage, ResultShape};
pub use signature::{CacheKey, ChatMessage, QuerySignature, SamplingParams};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

#[cfg(feature = "openai")]
pub use ai::OpenAiService;

// Re-export CancellationToken for convenience
pub use tokio_util::sync::CancellationToken;
