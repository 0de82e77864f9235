//! LLM service implementations.

pub mod openai;

pub use openai::OpenAiService;
