//! Uniform interface over heterogeneous LLM providers (spec.md §4.4).

pub mod adapter;
pub mod factory;
pub mod ollama;
pub mod openai;
pub mod stream;

pub use adapter::{LlmAdapter, LlmParams, OnToken, ResponseFormat};
pub use factory::{build_adapter, Role};
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;
