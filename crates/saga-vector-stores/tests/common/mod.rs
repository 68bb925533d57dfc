//! Shared fixtures for the end-to-end memory tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use saga_core::ingestion::{IngestRequest, IngestionPipeline, IngestionReport, PipelineOptions};
use saga_core::traits::{DistanceMetric, Embedder, EmbeddingAction, StoreConnector, VectorStore};
use saga_core::types::{EpisodeDelta, MemoryFact, MemoryVectorMetadata};
use saga_core::{
    EmbeddingBatcher, FactExtractor, MemoryQuery, RetrievalEngine, SagaError, SagaResult,
};

pub const DIMENSION: usize = 16;
pub const INDEX: &str = "character-memory";

/// Returns whatever facts were scripted for an episode id and version.
#[derive(Default)]
pub struct ScriptedExtractor {
    scripts: Mutex<HashMap<(String, u32), Vec<MemoryFact>>>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn script(&self, episode_id: &str, version: u32, facts: Vec<MemoryFact>) {
        self.scripts
            .lock()
            .unwrap()
            .insert((episode_id.to_string(), version), facts);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FactExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        _episode_text: &str,
        episode_id: &str,
        episode_no: u32,
        version: u32,
    ) -> SagaResult<EpisodeDelta> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let facts = self
            .scripts
            .lock()
            .unwrap()
            .get(&(episode_id.to_string(), version))
            .cloned()
            .ok_or_else(|| SagaError::extraction(format!("no script for {}", episode_id)))?;
        Ok(EpisodeDelta::new(episode_id, episode_no, version, facts))
    }
}

/// Bag-of-words embedder: texts sharing words land close together.
#[derive(Default)]
pub struct WordEmbedder {
    calls: AtomicUsize,
}

impl WordEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; DIMENSION];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32));
            vector[bucket as usize % DIMENSION] += 1.0;
        }
        vector[DIMENSION - 1] += 0.01;
        vector
    }
}

#[async_trait]
impl Embedder for WordEmbedder {
    async fn embed(&self, text: &str, _action: Option<EmbeddingAction>) -> SagaResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "word-embedder"
    }
}

/// Pipeline and engine wired to one connector.
pub struct Harness {
    pub extractor: Arc<ScriptedExtractor>,
    pub embedder: Arc<WordEmbedder>,
    pub connector: Arc<dyn StoreConnector>,
    pub pipeline: IngestionPipeline,
    pub engine: RetrievalEngine,
}

impl Harness {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        let extractor = Arc::new(ScriptedExtractor::default());
        let embedder = Arc::new(WordEmbedder::default());
        let batcher = || EmbeddingBatcher::new(embedder.clone(), 8, DIMENSION);
        let pipeline = IngestionPipeline::new(
            extractor.clone(),
            batcher(),
            connector.clone(),
            PipelineOptions {
                default_index: INDEX.to_string(),
                dimension: DIMENSION,
                metric: DistanceMetric::Cosine,
                supersede_prior_versions: true,
            },
        );
        let engine = RetrievalEngine::new(connector.clone(), batcher(), INDEX);
        Self {
            extractor,
            embedder,
            connector,
            pipeline,
            engine,
        }
    }

    pub async fn ingest(&self, episode_id: &str, episode_no: u32, version: u32) -> IngestionReport {
        let request = IngestRequest::new(episode_id, episode_no, version, "episode text");
        self.pipeline.ingest(&request).await.unwrap()
    }

    /// Texts recalled by `character` while in `episode_no`.
    pub async fn recall(&self, character: &str, episode_no: u32, query: &str) -> Vec<String> {
        let outcome = self
            .engine
            .search(&MemoryQuery {
                query: query.to_string(),
                current_episode_no: episode_no,
                active_character_id: character.to_string(),
                top_k: 20,
                story_id: None,
            })
            .await
            .unwrap();
        let mut texts: Vec<String> = outcome.memories.into_iter().map(|m| m.text).collect();
        texts.sort();
        texts
    }

    /// Every stored record, read back through a fresh session.
    pub async fn stored(&self) -> Vec<MemoryVectorMetadata> {
        let store: Arc<dyn VectorStore> = self.connector.connect().await.unwrap();
        let records = store.list(INDEX, None, 1000).await.unwrap();
        store.disconnect().await.unwrap();
        let mut metadata: Vec<MemoryVectorMetadata> = records
            .iter()
            .map(|r| MemoryVectorMetadata::from_payload(&r.payload).unwrap())
            .collect();
        metadata.sort_by(|a, b| a.vector_id.cmp(&b.vector_id));
        metadata
    }

    pub async fn stored_ids(&self) -> Vec<String> {
        self.stored().await.into_iter().map(|m| m.vector_id).collect()
    }
}

pub fn cafe_episode() -> Vec<MemoryFact> {
    vec![
        MemoryFact::world("Tsubasa runs the Blue Moon cafe near the station", 3),
        MemoryFact::character("genshin-tsubasa", "Tsubasa secretly reports on Nigo to the government", 5),
        MemoryFact::character("himuro-nigo", "Nigo stopped time to save a falling child", 4),
    ]
}
