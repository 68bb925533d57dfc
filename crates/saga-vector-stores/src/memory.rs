//! Process-local vector store.
//!
//! Evaluates filters with [`Filter::matches`] and ranks by exact similarity.
//! Clones share the same indexes, so the store doubles as its own
//! [`StoreConnector`].

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use saga_core::error::{SagaError, SagaResult};
use saga_core::traits::{
    DistanceMetric, IndexInfo, StoreConnector, VectorRecord, VectorSearchResult, VectorStore,
};
use saga_core::types::Filter;

struct MemoryIndex {
    dimension: usize,
    metric: DistanceMetric,
    records: BTreeMap<String, VectorRecord>,
}

/// In-memory vector store.
#[derive(Clone, Default)]
pub struct MemoryVectorStore {
    indexes: Arc<RwLock<HashMap<String, MemoryIndex>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> SagaResult<std::sync::RwLockReadGuard<'_, HashMap<String, MemoryIndex>>> {
        self.indexes
            .read()
            .map_err(|e| SagaError::vector_store(format!("Failed to acquire lock: {}", e)))
    }

    fn write(&self) -> SagaResult<std::sync::RwLockWriteGuard<'_, HashMap<String, MemoryIndex>>> {
        self.indexes
            .write()
            .map_err(|e| SagaError::vector_store(format!("Failed to acquire lock: {}", e)))
    }
}

pub(crate) fn similarity(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match metric {
        DistanceMetric::DotProduct => dot,
        DistanceMetric::Cosine => {
            let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                0.0
            } else {
                dot / (norm_a * norm_b)
            }
        }
        DistanceMetric::Euclidean => {
            let distance = a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt();
            1.0 / (1.0 + distance)
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_index(
        &self,
        name: &str,
        dimension: usize,
        distance: DistanceMetric,
    ) -> SagaResult<()> {
        let mut indexes = self.write()?;
        match indexes.get(name) {
            Some(existing) if existing.dimension != dimension => {
                Err(SagaError::vector_store(format!(
                    "Index '{}' has dimension {}, expected {}",
                    name, existing.dimension, dimension
                )))
            }
            Some(_) => Ok(()),
            None => {
                indexes.insert(
                    name.to_string(),
                    MemoryIndex {
                        dimension,
                        metric: distance,
                        records: BTreeMap::new(),
                    },
                );
                tracing::debug!(index = name, dimension, "Created in-memory index");
                Ok(())
            }
        }
    }

    async fn upsert(&self, index: &str, records: Vec<VectorRecord>) -> SagaResult<()> {
        let mut indexes = self.write()?;
        let stored = indexes
            .get_mut(index)
            .ok_or_else(|| SagaError::index_not_found(index))?;
        if let Some(bad) = records.iter().find(|r| r.vector.len() != stored.dimension) {
            return Err(SagaError::store_write(format!(
                "Record '{}' has dimension {}, index expects {}",
                bad.id,
                bad.vector.len(),
                stored.dimension
            )));
        }
        for record in records {
            stored.records.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
        include_vector: bool,
    ) -> SagaResult<Vec<VectorSearchResult>> {
        let indexes = self.read()?;
        let stored = indexes
            .get(index)
            .ok_or_else(|| SagaError::index_not_found(index))?;
        let mut results: Vec<VectorSearchResult> = stored
            .records
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.payload)))
            .map(|r| VectorSearchResult {
                id: r.id.clone(),
                score: similarity(stored.metric, vector, &r.vector),
                payload: r.payload.clone(),
                vector: include_vector.then(|| r.vector.clone()),
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }

    async fn list(
        &self,
        index: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> SagaResult<Vec<VectorRecord>> {
        let indexes = self.read()?;
        let stored = indexes
            .get(index)
            .ok_or_else(|| SagaError::index_not_found(index))?;
        Ok(stored
            .records
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.payload)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_by_filter(&self, index: &str, filter: &Filter) -> SagaResult<Option<u64>> {
        let mut indexes = self.write()?;
        let stored = indexes
            .get_mut(index)
            .ok_or_else(|| SagaError::index_not_found(index))?;
        let before = stored.records.len();
        stored.records.retain(|_, r| !filter.matches(&r.payload));
        Ok(Some((before - stored.records.len()) as u64))
    }

    async fn delete_index(&self, name: &str) -> SagaResult<()> {
        self.write()?.remove(name);
        Ok(())
    }

    async fn index_info(&self, name: &str) -> SagaResult<IndexInfo> {
        let indexes = self.read()?;
        let stored = indexes
            .get(name)
            .ok_or_else(|| SagaError::index_not_found(name))?;
        Ok(IndexInfo {
            name: name.to_string(),
            vector_count: stored.records.len() as u64,
            dimension: stored.dimension,
            distance: stored.metric,
        })
    }
}

#[async_trait]
impl StoreConnector for MemoryVectorStore {
    async fn connect(&self) -> SagaResult<Arc<dyn VectorStore>> {
        Ok(Arc::new(self.clone()))
    }

    fn provider(&self) -> &str {
        "memory"
    }
}
