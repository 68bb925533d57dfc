//! Fakes for exercising commands without external services.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use saga_core::ingestion::{IngestionPipeline, PipelineOptions};
use saga_core::traits::{DistanceMetric, Embedder, EmbeddingAction};
use saga_core::types::{EpisodeDelta, MemoryFact};
use saga_core::{EmbeddingBatcher, FactExtractor, SagaError, SagaResult};
use saga_vector_stores::MemoryVectorStore;

pub const DIMENSION: usize = 4;

#[derive(Default)]
pub struct ScriptedExtractor {
    scripts: Mutex<HashMap<String, Vec<MemoryFact>>>,
}

impl ScriptedExtractor {
    pub fn script(&self, episode_id: &str, facts: Vec<MemoryFact>) {
        self.scripts.lock().unwrap().insert(episode_id.to_string(), facts);
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
        let facts = self
            .scripts
            .lock()
            .unwrap()
            .get(episode_id)
            .cloned()
            .ok_or_else(|| SagaError::extraction(format!("no facts scripted for {}", episode_id)))?;
        Ok(EpisodeDelta::new(episode_id, episode_no, version, facts))
    }
}

/// Embeds every text as its length spread over a fixed direction.
pub struct LengthEmbedder;

#[async_trait]
impl Embedder for LengthEmbedder {
    async fn embed(&self, text: &str, _action: Option<EmbeddingAction>) -> SagaResult<Vec<f32>> {
        Ok(vec![text.len() as f32 + 1.0, 1.0, 0.5, 0.25])
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "length"
    }
}

pub fn pipeline(extractor: Arc<ScriptedExtractor>) -> IngestionPipeline {
    IngestionPipeline::new(
        extractor,
        EmbeddingBatcher::new(Arc::new(LengthEmbedder), 8, DIMENSION),
        Arc::new(MemoryVectorStore::new()),
        PipelineOptions {
            default_index: "character-memory".to_string(),
            dimension: DIMENSION,
            metric: DistanceMetric::Cosine,
            supersede_prior_versions: true,
        },
    )
}
