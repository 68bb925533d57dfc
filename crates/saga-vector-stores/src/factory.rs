//! Factory for creating vector store connectors.

use std::sync::Arc;

use saga_core::error::{SagaError, SagaResult};
use saga_core::traits::{StoreConnector, VectorStoreConfig, VectorStoreProvider};

/// Factory for creating vector store connectors.
pub struct VectorStoreFactory;

impl VectorStoreFactory {
    /// Create a connector for the configured backend.
    ///
    /// Backends compiled out by cargo features are reported as
    /// [`SagaError::UnsupportedProvider`].
    pub fn connector(config: &VectorStoreConfig) -> SagaResult<Arc<dyn StoreConnector>> {
        match config.provider {
            #[cfg(feature = "qdrant")]
            VectorStoreProvider::Qdrant => {
                Ok(Arc::new(crate::qdrant::QdrantConnector::new(config.clone())))
            }

            #[cfg(feature = "sqlite-vec")]
            VectorStoreProvider::SqliteVec => {
                let path = config.path.clone().ok_or_else(|| {
                    SagaError::configuration("vector_store.path is required for sqlite_vec")
                })?;
                Ok(Arc::new(crate::sqlite_vec::SqliteVecConnector::new(path)))
            }

            VectorStoreProvider::Memory => Ok(Arc::new(crate::memory::MemoryVectorStore::new())),

            #[allow(unreachable_patterns)]
            other => Err(SagaError::UnsupportedProvider {
                provider: format!("{:?} (enable the matching cargo feature)", other),
            }),
        }
    }

    /// Connector for a Qdrant server.
    #[cfg(feature = "qdrant")]
    pub fn qdrant(url: &str, dimension: usize) -> Arc<dyn StoreConnector> {
        Arc::new(crate::qdrant::QdrantConnector::new(VectorStoreConfig {
            provider: VectorStoreProvider::Qdrant,
            url: Some(url.to_string()),
            dimension,
            ..Default::default()
        }))
    }

    /// Connector for a sqlite-vec database file.
    #[cfg(feature = "sqlite-vec")]
    pub fn sqlite_vec(path: impl Into<std::path::PathBuf>) -> Arc<dyn StoreConnector> {
        Arc::new(crate::sqlite_vec::SqliteVecConnector::new(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_connector() {
        let config = VectorStoreConfig {
            provider: VectorStoreProvider::Memory,
            ..Default::default()
        };
        let connector = VectorStoreFactory::connector(&config).unwrap();
        assert_eq!(connector.provider(), "memory");
    }

    #[cfg(feature = "sqlite-vec")]
    #[test]
    fn test_sqlite_vec_requires_path() {
        let config = VectorStoreConfig {
            provider: VectorStoreProvider::SqliteVec,
            ..Default::default()
        };
        assert!(matches!(
            VectorStoreFactory::connector(&config),
            Err(SagaError::Configuration(_))
        ));
    }

    #[cfg(feature = "qdrant")]
    #[test]
    fn test_qdrant_connector() {
        let connector = VectorStoreFactory::qdrant("http://localhost:6334", 1024);
        assert_eq!(connector.provider(), "qdrant");
    }
}
