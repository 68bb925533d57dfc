//! In-crate test doubles.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::embedding::testing::HashEmbedder;
use crate::error::{SagaError, SagaResult};
use crate::traits::{
    DistanceMetric, IndexInfo, StoreConnector, VectorRecord, VectorSearchResult, VectorStore,
};
use crate::types::{EpisodeDelta, Filter, MemoryVectorRecord};

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    queries: AtomicUsize,
    upserts: AtomicUsize,
    last_top_k: AtomicUsize,
    fail_queries: AtomicBool,
    fail_upserts: AtomicBool,
    fail_deletes: AtomicBool,
}

/// Filter-evaluating store that counts sessions and calls.
#[derive(Clone, Default)]
pub struct RecordingStore {
    indexes: Arc<Mutex<HashMap<String, (usize, BTreeMap<String, VectorRecord>)>>>,
    counters: Arc<Counters>,
}

impl RecordingStore {
    /// Write a delta directly, with [`HashEmbedder`] vectors of dimension 4.
    pub fn seed(&self, index: &str, delta: &EpisodeDelta) {
        let mut indexes = self.indexes.lock().unwrap();
        let (_, records) = indexes
            .entry(index.to_string())
            .or_insert_with(|| (4, BTreeMap::new()));
        for metadata in delta.metadata().unwrap() {
            let embedding = HashEmbedder::vector_for(&metadata.text, 4);
            let record: VectorRecord = MemoryVectorRecord { metadata, embedding }.into();
            records.insert(record.id.clone(), record);
        }
    }

    pub fn count(&self, index: &str) -> usize {
        self.indexes
            .lock()
            .unwrap()
            .get(index)
            .map_or(0, |(_, records)| records.len())
    }

    pub fn ids(&self, index: &str) -> Vec<String> {
        self.indexes
            .lock()
            .unwrap()
            .get(index)
            .map_or_else(Vec::new, |(_, records)| records.keys().cloned().collect())
    }

    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.counters.disconnects.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.counters.queries.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> usize {
        self.counters.upserts.load(Ordering::SeqCst)
    }

    pub fn last_top_k(&self) -> usize {
        self.counters.last_top_k.load(Ordering::SeqCst)
    }

    pub fn fail_queries(&self) {
        self.counters.fail_queries.store(true, Ordering::SeqCst);
    }

    pub fn fail_upserts(&self) {
        self.counters.fail_upserts.store(true, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self) {
        self.counters.fail_deletes.store(true, Ordering::SeqCst);
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl VectorStore for RecordingStore {
    async fn ensure_index(&self, name: &str, dimension: usize, _: DistanceMetric) -> SagaResult<()> {
        self.indexes
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| (dimension, BTreeMap::new()));
        Ok(())
    }

    async fn upsert(&self, index: &str, records: Vec<VectorRecord>) -> SagaResult<()> {
        self.counters.upserts.fetch_add(1, Ordering::SeqCst);
        if self.counters.fail_upserts.load(Ordering::SeqCst) {
            return Err(SagaError::vector_store("connection refused"));
        }
        let mut indexes = self.indexes.lock().unwrap();
        let (_, stored) = indexes
            .get_mut(index)
            .ok_or_else(|| SagaError::index_not_found(index))?;
        for record in records {
            stored.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
        _include_vector: bool,
    ) -> SagaResult<Vec<VectorSearchResult>> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        self.counters.last_top_k.store(top_k, Ordering::SeqCst);
        if self.counters.fail_queries.load(Ordering::SeqCst) {
            return Err(SagaError::vector_store("timeout"));
        }
        let indexes = self.indexes.lock().unwrap();
        let (_, stored) = indexes
            .get(index)
            .ok_or_else(|| SagaError::index_not_found(index))?;
        let mut results: Vec<VectorSearchResult> = stored
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.payload)))
            .map(|r| VectorSearchResult {
                id: r.id.clone(),
                score: dot(vector, &r.vector),
                payload: r.payload.clone(),
                vector: None,
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
        let indexes = self.indexes.lock().unwrap();
        let (_, stored) = indexes
            .get(index)
            .ok_or_else(|| SagaError::index_not_found(index))?;
        Ok(stored
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.payload)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_by_filter(&self, index: &str, filter: &Filter) -> SagaResult<Option<u64>> {
        if self.counters.fail_deletes.load(Ordering::SeqCst) {
            return Err(SagaError::vector_store("delete rejected"));
        }
        let mut indexes = self.indexes.lock().unwrap();
        let (_, stored) = indexes
            .get_mut(index)
            .ok_or_else(|| SagaError::index_not_found(index))?;
        let before = stored.len();
        stored.retain(|_, r| !filter.matches(&r.payload));
        Ok(Some((before - stored.len()) as u64))
    }

    async fn delete_index(&self, name: &str) -> SagaResult<()> {
        self.indexes.lock().unwrap().remove(name);
        Ok(())
    }

    async fn index_info(&self, name: &str) -> SagaResult<IndexInfo> {
        let indexes = self.indexes.lock().unwrap();
        let (dimension, stored) = indexes
            .get(name)
            .ok_or_else(|| SagaError::index_not_found(name))?;
        Ok(IndexInfo {
            name: name.to_string(),
            vector_count: stored.len() as u64,
            dimension: *dimension,
            distance: DistanceMetric::Cosine,
        })
    }

    async fn disconnect(&self) -> SagaResult<()> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl StoreConnector for RecordingStore {
    async fn connect(&self) -> SagaResult<Arc<dyn VectorStore>> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }

    fn provider(&self) -> &str {
        "recording"
    }
}
