//! saga-core - Core library for saga.
//!
//! Episodic, access-scoped memory for role-played characters. Episodes are
//! turned into scoped facts, embedded and written under deterministic ids;
//! characters recall them only through a filter that hides the future and
//! other characters' secrets.
//!
//! # Example
//!
//! ```ignore
//! use saga_core::{IngestRequest, IngestionPipeline, MemoryQuery, RetrievalEngine};
//!
//! let report = pipeline
//!     .ingest(&IngestRequest::new("episode-3", 3, 1, episode_text))
//!     .await?;
//!
//! let outcome = engine
//!     .search(&MemoryQuery {
//!         query: "the cafe".into(),
//!         current_episode_no: 4,
//!         active_character_id: "misaki".into(),
//!         top_k: 5,
//!         story_id: None,
//!     })
//!     .await?;
//! ```

pub mod agent;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod ingestion;
pub mod retrieval;
pub mod traits;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use agent::{
    AgentReply, CharacterAgent, CharacterAgentFactory, RecallInput, RecallOutput, RecallPolicy,
    RecalledMemory, TalkResponse,
};
pub use config::{
    EmbedderProviderConfig, IngestionConfig, LlmProvider, LlmProviderConfig, RetrievalConfig,
    SagaConfig,
};
pub use embedding::EmbeddingBatcher;
pub use error::{ErrorCode, SagaError, SagaResult};
pub use extraction::{FactExtractor, LlmFactExtractor};
pub use ingestion::{
    IngestAction, IngestFailure, IngestRequest, IngestState, IngestStage, IngestionPipeline,
    IngestionReport, PipelineOptions,
};
pub use retrieval::{MemoryQuery, RetrievalEngine, RetrievedMemory, SearchOutcome};
pub use traits::{
    Embedder, EmbedderConfig, EmbeddingAction, Llm, LlmConfig, StoreConnector, VectorStore,
    VectorStoreConfig,
};
pub use types::{
    derive_vector_id, index_name, CharacterInfo, CharacterRegistry, EpisodeDelta, Filter,
    MemoryFact, MemoryScope, MemoryVectorMetadata, MemoryVectorRecord, Message, MessageRole,
    VectorId,
};
