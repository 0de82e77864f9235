//! Data types shared by the cache, executor and orchestrator.

pub mod batch;
pub mod config;
pub mod entry;
