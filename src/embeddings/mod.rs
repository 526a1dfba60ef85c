//! Embedding generation for chunk remediation.
//!
//! Vector generation is delegated to an [`EmbeddingProvider`]. This crate
//! ships an Ollama provider and only checks the shape and quality of what a
//! provider returns before caching it.
//!
//! Settings come from the `embeddings` section of the sync config, with
//! `OLLAMA_ENDPOINT` and `OLLAMA_MODEL` taking precedence.

pub mod ollama;
pub mod provider;
pub mod types;
pub mod validate;

pub use ollama::OllamaProvider;
pub use provider::EmbeddingProvider;
pub use types::{ollama_models, ModelConfig, ProviderInfo};
pub use validate::validate_embedding;
