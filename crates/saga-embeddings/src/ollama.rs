//! Ollama embedding provider implementation.

use async_trait::async_trait;

use saga_core::error::{SagaError, SagaResult};
use saga_core::traits::{Embedder, EmbedderConfig, EmbeddingAction};

#[cfg(feature = "ollama")]
use ollama_rs::{
    generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest},
    Ollama,
};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Ollama embedding provider.
pub struct OllamaEmbedder {
    #[cfg(feature = "ollama")]
    client: Ollama,
    config: EmbedderConfig,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder.
    pub fn new(config: EmbedderConfig) -> SagaResult<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        let url = url::Url::parse(&base_url)
            .map_err(|e| SagaError::Configuration(format!("Invalid Ollama URL: {}", e)))?;

        let host = format!("{}://{}", url.scheme(), url.host_str().unwrap_or("localhost"));
        let port = url.port().unwrap_or(11434);

        #[cfg(feature = "ollama")]
        let client = Ollama::new(host, port);
        #[cfg(not(feature = "ollama"))]
        let _ = (host, port);

        Ok(Self {
            #[cfg(feature = "ollama")]
            client,
            config,
        })
    }

    #[cfg(feature = "ollama")]
    async fn request(&self, input: EmbeddingsInput) -> SagaResult<Vec<Vec<f32>>> {
        let request = GenerateEmbeddingsRequest::new(self.config.model.clone(), input);
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| SagaError::embedding(format!("Ollama embedding error: {}", e)))?;
        Ok(response.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    #[cfg(feature = "ollama")]
    async fn embed(&self, text: &str, _action: Option<EmbeddingAction>) -> SagaResult<Vec<f32>> {
        self.request(EmbeddingsInput::Single(text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SagaError::embedding("No embedding returned"))
    }

    #[cfg(not(feature = "ollama"))]
    async fn embed(&self, _text: &str, _action: Option<EmbeddingAction>) -> SagaResult<Vec<f32>> {
        Err(SagaError::Configuration(
            "Ollama feature not enabled. Enable the 'ollama' feature.".to_string(),
        ))
    }

    #[cfg(feature = "ollama")]
    async fn embed_batch(
        &self,
        texts: &[String],
        _action: Option<EmbeddingAction>,
    ) -> SagaResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(EmbeddingsInput::Multiple(texts.to_vec())).await
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dims
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
