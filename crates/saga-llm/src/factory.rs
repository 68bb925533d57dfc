//! Factory for creating LLM providers.

use std::sync::Arc;

use saga_core::config::{LlmProvider, LlmProviderConfig};
use saga_core::error::SagaResult;
use saga_core::traits::{Llm, LlmConfig};

use crate::anthropic::AnthropicLlm;
use crate::openai::OpenAIProvider;

/// Factory for creating LLM providers.
pub struct LlmFactory;

impl LlmFactory {
    /// Create an LLM provider from the given configuration.
    pub fn create(provider: LlmProvider, config: LlmConfig) -> SagaResult<Arc<dyn Llm>> {
        tracing::debug!(?provider, model = %config.model, "Creating LLM provider");
        match provider {
            LlmProvider::OpenAI => Ok(Arc::new(OpenAIProvider::new(config)?)),
            LlmProvider::Anthropic => Ok(Arc::new(AnthropicLlm::new(config)?)),
        }
    }

    /// Create the provider described by one `[llm]` or `[agent_llm]` section.
    pub fn from_config(config: &LlmProviderConfig) -> SagaResult<Arc<dyn Llm>> {
        Self::create(config.provider, config.config.clone())
    }

    /// Create an OpenAI LLM provider with a specific model.
    pub fn openai_with_model(model: impl Into<String>) -> SagaResult<Arc<dyn Llm>> {
        let config = LlmConfig {
            model: model.into(),
            ..Default::default()
        };
        Self::create(LlmProvider::OpenAI, config)
    }

    /// Create an Anthropic LLM provider with a specific model.
    pub fn anthropic_with_model(model: impl Into<String>) -> SagaResult<Arc<dyn Llm>> {
        let config = LlmConfig {
            model: model.into(),
            ..Default::default()
        };
        Self::create(LlmProvider::Anthropic, config)
    }
}
