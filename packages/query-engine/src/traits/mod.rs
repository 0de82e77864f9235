//! Trait seams of the engine.
//!
//! - [`llm::LlmService`]: the remote text-generation service
//! - [`store::QueryCache`]: the persistent finished/pending cache

pub mod llm;
pub mod store;
