//! Wiring of providers and core services from configuration.

use std::sync::Arc;

use saga_core::agent::CharacterAgentFactory;
use saga_core::error::SagaResult;
use saga_core::ingestion::{IngestionPipeline, PipelineOptions};
use saga_core::traits::{StoreConnector, VectorStoreProvider};
use saga_core::{EmbeddingBatcher, LlmFactExtractor, RetrievalEngine, SagaConfig};

use saga_embeddings::EmbedderFactory;
use saga_llm::LlmFactory;
use saga_vector_stores::VectorStoreFactory;

/// Connector for the configured vector store.
pub fn create_connector(config: &SagaConfig) -> SagaResult<Arc<dyn StoreConnector>> {
    if config.vector_store.provider == VectorStoreProvider::Memory {
        tracing::warn!("Using the in-memory vector store; nothing outlives this process");
    }
    VectorStoreFactory::connector(&config.vector_store)
}

fn create_embeddings(config: &SagaConfig) -> SagaResult<EmbeddingBatcher> {
    let embedder = EmbedderFactory::from_config(&config.embedder)?;
    Ok(EmbeddingBatcher::new(
        embedder,
        config.ingestion.embed_batch_size,
        config.vector_store.dimension,
    ))
}

/// Extraction, embedding and store wired into one pipeline.
pub fn create_pipeline(
    config: &SagaConfig,
    connector: Arc<dyn StoreConnector>,
) -> SagaResult<IngestionPipeline> {
    let llm = LlmFactory::from_config(&config.llm)?;
    let extractor = LlmFactExtractor::new(llm, Arc::new(config.characters.clone()))
        .with_custom_instructions(config.ingestion.custom_extraction_prompt.clone());

    Ok(IngestionPipeline::new(
        Arc::new(extractor),
        create_embeddings(config)?,
        connector,
        PipelineOptions::from_config(config),
    ))
}

pub fn create_engine(
    config: &SagaConfig,
    connector: Arc<dyn StoreConnector>,
) -> SagaResult<Arc<RetrievalEngine>> {
    Ok(Arc::new(RetrievalEngine::new(
        connector,
        create_embeddings(config)?,
        config.vector_store.default_index.clone(),
    )))
}

/// Character agents backed by the conversational LLM.
pub fn create_agents(
    config: &SagaConfig,
    engine: Arc<RetrievalEngine>,
) -> SagaResult<CharacterAgentFactory> {
    let llm = LlmFactory::from_config(config.agent_llm())?;
    Ok(CharacterAgentFactory::new(
        Arc::new(config.characters.clone()),
        engine,
        llm,
        config.retrieval.clone(),
    ))
}
