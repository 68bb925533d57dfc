//! Embedder trait and related types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SagaResult;

/// The action context for embedding (some models embed documents and queries differently).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingAction {
    /// Embedding facts for storage.
    #[default]
    Add,
    /// Embedding a recall query.
    Search,
}

/// Core Embedder trait - all embedding providers implement this.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text.
    async fn embed(&self, text: &str, action: Option<EmbeddingAction>) -> SagaResult<Vec<f32>>;

    /// Generate embeddings for multiple texts, one per input and in input order.
    async fn embed_batch(
        &self,
        texts: &[String],
        action: Option<EmbeddingAction>,
    ) -> SagaResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text, action).await?);
        }
        Ok(embeddings)
    }

    /// Get the dimension of the embeddings.
    fn dimension(&self) -> usize;

    /// Get the model name.
    fn model_name(&self) -> &str;
}

/// Embedder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Model name/identifier.
    pub model: String,
    /// Embedding dimensions.
    #[serde(default = "default_embedding_dims")]
    pub embedding_dims: usize,
    /// API key (if not using environment variable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL for API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

pub(crate) fn default_embedding_dims() -> usize {
    1024
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            embedding_dims: default_embedding_dims(),
            api_key: None,
            base_url: None,
        }
    }
}

/// Embedder provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderProvider {
    #[default]
    OpenAI,
    Ollama,
}
