//! OpenAI embedding provider implementation.

use async_trait::async_trait;

use saga_core::error::{SagaError, SagaResult};
use saga_core::traits::{Embedder, EmbedderConfig, EmbeddingAction};

#[cfg(feature = "openai")]
use async_openai::{
    config::OpenAIConfig,
    types::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};

/// OpenAI embedding provider.
pub struct OpenAIEmbedder {
    #[cfg(feature = "openai")]
    client: Client<OpenAIConfig>,
    config: EmbedderConfig,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder.
    pub fn new(config: EmbedderConfig) -> SagaResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                SagaError::Configuration("OpenAI API key not found. Set OPENAI_API_KEY environment variable or provide api_key in config.".to_string())
            })?;

        #[cfg(feature = "openai")]
        let client = {
            let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
            if let Some(ref base_url) = config.base_url {
                openai_config = openai_config.with_api_base(base_url);
            }
            Client::with_config(openai_config)
        };
        #[cfg(not(feature = "openai"))]
        let _ = api_key;

        Ok(Self {
            #[cfg(feature = "openai")]
            client,
            config,
        })
    }

    /// Only the text-embedding-3 family accepts a reduced output dimension.
    #[cfg(feature = "openai")]
    fn dimensions_param(&self) -> Option<u32> {
        self.config
            .model
            .starts_with("text-embedding-3")
            .then_some(self.config.embedding_dims as u32)
    }

    #[cfg(feature = "openai")]
    async fn request(&self, input: EmbeddingInput) -> SagaResult<Vec<Vec<f32>>> {
        let request = CreateEmbeddingRequest {
            model: self.config.model.clone(),
            input,
            dimensions: self.dimensions_param(),
            ..Default::default()
        };

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| SagaError::embedding(format!("OpenAI embedding error: {}", e)))?;

        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    #[cfg(feature = "openai")]
    async fn embed(&self, text: &str, _action: Option<EmbeddingAction>) -> SagaResult<Vec<f32>> {
        self.request(EmbeddingInput::String(text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SagaError::embedding("No embedding returned"))
    }

    #[cfg(not(feature = "openai"))]
    async fn embed(&self, _text: &str, _action: Option<EmbeddingAction>) -> SagaResult<Vec<f32>> {
        Err(SagaError::Configuration(
            "OpenAI feature not enabled. Enable the 'openai' feature.".to_string(),
        ))
    }

    #[cfg(feature = "openai")]
    async fn embed_batch(
        &self,
        texts: &[String],
        _action: Option<EmbeddingAction>,
    ) -> SagaResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(EmbeddingInput::StringArray(texts.to_vec())).await
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dims
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
