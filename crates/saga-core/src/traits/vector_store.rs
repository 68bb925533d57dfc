//! Vector store trait and related types.
//!
//! A store holds any number of named indexes. Every operation names the index
//! it acts on so one connection can serve several stories.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SagaResult;
use crate::types::{Filter, MemoryVectorMetadata, MemoryVectorRecord};

/// Distance metric for vector similarity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    DotProduct,
}

/// A vector record with payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Unique identifier.
    pub id: String,
    /// Vector embedding.
    pub vector: Vec<f32>,
    /// Metadata payload.
    pub payload: HashMap<String, serde_json::Value>,
}

impl VectorRecord {
    /// Create a new vector record.
    pub fn new(
        id: impl Into<String>,
        vector: Vec<f32>,
        payload: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            vector,
            payload,
        }
    }

    /// Get a payload value as a string.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

impl From<MemoryVectorRecord> for VectorRecord {
    fn from(record: MemoryVectorRecord) -> Self {
        let payload = record.metadata.to_payload();
        Self {
            id: record.metadata.vector_id,
            vector: record.embedding,
            payload,
        }
    }
}

/// Search result from vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSearchResult {
    /// Unique identifier.
    pub id: String,
    /// Similarity score, higher is closer.
    pub score: f32,
    /// Metadata payload.
    pub payload: HashMap<String, serde_json::Value>,
    /// Stored vector, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

impl VectorSearchResult {
    /// Decode the payload into fact metadata.
    pub fn metadata(&self) -> SagaResult<MemoryVectorMetadata> {
        MemoryVectorMetadata::from_payload(&self.payload)
    }
}

/// Index information.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Number of vectors.
    pub vector_count: u64,
    /// Vector dimension.
    pub dimension: usize,
    /// Distance metric.
    pub distance: DistanceMetric,
}

/// Core VectorStore trait - all vector store backends implement this.
///
/// Implementations are sessions: a caller obtains one from a
/// [`StoreConnector`], performs one logical operation and calls
/// [`disconnect`](VectorStore::disconnect) on every exit path.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the index if it does not exist. Calling it again is a no-op.
    async fn ensure_index(
        &self,
        name: &str,
        dimension: usize,
        distance: DistanceMetric,
    ) -> SagaResult<()>;

    /// Write records keyed by id, overwriting existing records with the same id.
    ///
    /// Either every record is written or the call fails. Backends that cannot
    /// guarantee this must report a partial failure as
    /// [`SagaError::StoreWrite`](crate::SagaError::StoreWrite) with `partial` set.
    async fn upsert(&self, index: &str, records: Vec<VectorRecord>) -> SagaResult<()>;

    /// Return up to `top_k` records matching `filter`, best match first.
    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
        include_vector: bool,
    ) -> SagaResult<Vec<VectorSearchResult>>;

    /// List records matching `filter` without ranking.
    async fn list(
        &self,
        index: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> SagaResult<Vec<VectorRecord>>;

    /// Delete every record matching `filter`, returning how many were removed
    /// when the backend reports it.
    async fn delete_by_filter(&self, index: &str, filter: &Filter) -> SagaResult<Option<u64>>;

    /// Drop an index and all its records.
    async fn delete_index(&self, name: &str) -> SagaResult<()>;

    /// Get index information.
    async fn index_info(&self, name: &str) -> SagaResult<IndexInfo>;

    /// Release the session. Safe to call more than once.
    async fn disconnect(&self) -> SagaResult<()> {
        Ok(())
    }
}

/// Disconnect a session, logging rather than propagating a failure so the
/// caller's own result is what reaches the transport.
pub async fn release_session(store: &dyn VectorStore) {
    if let Err(e) = store.disconnect().await {
        tracing::warn!(error = %e, "Failed to disconnect vector store session");
    }
}

/// Opens vector store sessions.
///
/// The pipeline and retrieval engine hold a connector rather than a
/// long-lived client, and acquire a session per logical operation.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> SagaResult<Arc<dyn VectorStore>>;

    /// Backend name, for logs.
    fn provider(&self) -> &str;
}

/// Vector store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Provider type.
    pub provider: VectorStoreProvider,
    /// Server location (Qdrant).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// API key (Qdrant Cloud).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Database file (sqlite-vec).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<std::path::PathBuf>,
    /// Index name used when no story is given.
    #[serde(default = "default_index_name")]
    pub default_index: String,
    /// Embedding dimensions.
    #[serde(default = "crate::traits::embedder::default_embedding_dims")]
    pub dimension: usize,
    /// Similarity metric for new indexes.
    #[serde(default)]
    pub metric: DistanceMetric,
    /// Maximum records per backend write request.
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

pub const DEFAULT_INDEX_NAME: &str = "character-memory";

fn default_index_name() -> String {
    DEFAULT_INDEX_NAME.to_string()
}

fn default_upsert_batch_size() -> usize {
    500
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: VectorStoreProvider::Qdrant,
            url: None,
            api_key: None,
            path: None,
            default_index: default_index_name(),
            dimension: crate::traits::embedder::default_embedding_dims(),
            metric: DistanceMetric::Cosine,
            upsert_batch_size: default_upsert_batch_size(),
        }
    }
}

/// Vector store provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VectorStoreProvider {
    #[default]
    Qdrant,
    /// SQLite with sqlite-vec extension for embedded vector search.
    SqliteVec,
    /// Process-local store, for tests and experiments.
    Memory,
}
