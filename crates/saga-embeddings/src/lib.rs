//! saga-embeddings - Embedding provider implementations for saga.
//!
//! Fact texts and recall queries must be embedded by the same model; the
//! configured `embedding_dims` has to match the vector index dimension.
//!
//! # Supported Providers
//!
//! - **OpenAI** (feature: `openai`) - text-embedding-3-small, text-embedding-3-large
//! - **Ollama** (feature: `ollama`) - Local embedding models via Ollama
//!
//! # Example
//!
//! ```ignore
//! use saga_embeddings::EmbedderFactory;
//!
//! let embedder = EmbedderFactory::openai_with_model("text-embedding-3-small", 1024)?;
//! let embedder = EmbedderFactory::from_config(&config.embedder)?;
//! ```

mod factory;
mod ollama;
mod openai;

pub use factory::EmbedderFactory;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAIEmbedder;

// Re-export core types for convenience
pub use saga_core::traits::{Embedder, EmbedderConfig, EmbedderProvider, EmbeddingAction};
