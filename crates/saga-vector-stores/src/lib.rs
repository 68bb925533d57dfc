//! saga-vector-stores - Vector store backends for saga.
//!
//! Every backend implements [`VectorStore`] for one session and
//! [`StoreConnector`] for opening sessions.
//!
//! # Supported Backends
//!
//! - **Qdrant** (feature: `qdrant`, default) - payload-indexed collections
//! - **sqlite-vec** (feature: `sqlite-vec`) - embedded, one table per index
//! - **In-memory** (always available) - process-local, for tests and local runs

mod factory;
mod memory;

#[cfg(feature = "qdrant")]
mod qdrant;

#[cfg(feature = "sqlite-vec")]
mod sqlite_vec;

// Public exports
pub use factory::VectorStoreFactory;
pub use memory::MemoryVectorStore;

#[cfg(feature = "qdrant")]
pub use qdrant::{point_id, QdrantConnector, QdrantFilterTranslator, QdrantVectorStore};

#[cfg(feature = "sqlite-vec")]
pub use sqlite_vec::{SqlFilterTranslator, SqliteVecConnector, SqliteVecStore};

// Re-export core types for convenience
pub use saga_core::traits::{
    DistanceMetric, IndexInfo, StoreConnector, VectorRecord, VectorSearchResult, VectorStore,
    VectorStoreConfig, VectorStoreProvider,
};
