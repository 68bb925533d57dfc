//! Factory for creating embedding providers.

use std::sync::Arc;

use saga_core::config::EmbedderProviderConfig;
use saga_core::error::SagaResult;
use saga_core::traits::{Embedder, EmbedderConfig, EmbedderProvider};

use crate::ollama::OllamaEmbedder;
use crate::openai::OpenAIEmbedder;

/// Factory for creating embedding providers.
pub struct EmbedderFactory;

impl EmbedderFactory {
    /// Create an embedder from the given configuration.
    pub fn create(
        provider: EmbedderProvider,
        config: EmbedderConfig,
    ) -> SagaResult<Arc<dyn Embedder>> {
        tracing::debug!(?provider, model = %config.model, dims = config.embedding_dims, "Creating embedder");
        match provider {
            EmbedderProvider::OpenAI => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
            EmbedderProvider::Ollama => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        }
    }

    /// Create the embedder described by the `[embedder]` section.
    pub fn from_config(config: &EmbedderProviderConfig) -> SagaResult<Arc<dyn Embedder>> {
        Self::create(config.provider, config.config.clone())
    }

    /// Create an OpenAI embedder with a specific model.
    pub fn openai_with_model(
        model: impl Into<String>,
        dims: usize,
    ) -> SagaResult<Arc<dyn Embedder>> {
        let config = EmbedderConfig {
            model: model.into(),
            embedding_dims: dims,
            ..Default::default()
        };
        Self::create(EmbedderProvider::OpenAI, config)
    }

    /// Create an Ollama embedder with a specific model.
    pub fn ollama_with_model(
        model: impl Into<String>,
        dims: usize,
    ) -> SagaResult<Arc<dyn Embedder>> {
        let config = EmbedderConfig {
            model: model.into(),
            embedding_dims: dims,
            ..Default::default()
        };
        Self::create(EmbedderProvider::Ollama, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_from_config() {
        let config = EmbedderProviderConfig {
            provider: EmbedderProvider::Ollama,
            config: EmbedderConfig {
                model: "nomic-embed-text".to_string(),
                embedding_dims: 768,
                base_url: Some("http://127.0.0.1:11434".to_string()),
                api_key: None,
            },
        };
        let embedder = EmbedderFactory::from_config(&config).unwrap();
        assert_eq!(embedder.dimension(), 768);
        assert_eq!(embedder.model_name(), "nomic-embed-text");
    }

    #[test]
    fn test_invalid_ollama_url() {
        assert!(OllamaEmbedder::new(EmbedderConfig {
            base_url: Some("not a url".to_string()),
            ..Default::default()
        })
        .is_err());
    }
}
