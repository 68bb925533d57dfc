//! Extract, embed and upsert one episode.

use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::types::{IngestFailure, IngestRequest, IngestStage, IngestState, IngestionReport};
use crate::config::SagaConfig;
use crate::embedding::EmbeddingBatcher;
use crate::error::{ErrorCode, SagaError, SagaResult};
use crate::extraction::FactExtractor;
use crate::retrieval::{episode_filter, newer_version_filter, superseded_filter};
use crate::traits::{release_session, DistanceMetric, StoreConnector, VectorRecord, VectorStore};
use crate::types::{fields, index_name, EpisodeDelta, MemoryVectorRecord, VectorId};

/// Store-side settings the pipeline needs.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub default_index: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub supersede_prior_versions: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &SagaConfig) -> Self {
        Self {
            default_index: config.vector_store.default_index.clone(),
            dimension: config.vector_store.dimension,
            metric: config.vector_store.metric,
            supersede_prior_versions: config.ingestion.supersede_prior_versions,
        }
    }
}

/// The only writer of memory records.
///
/// Each call handles one episode. Concurrent calls for different episodes or
/// stories share nothing but the store, and every write fully determines its
/// own keys, so no locking is needed.
pub struct IngestionPipeline {
    extractor: Arc<dyn FactExtractor>,
    embeddings: EmbeddingBatcher,
    connector: Arc<dyn StoreConnector>,
    options: PipelineOptions,
}

impl IngestionPipeline {
    pub fn new(
        extractor: Arc<dyn FactExtractor>,
        embeddings: EmbeddingBatcher,
        connector: Arc<dyn StoreConnector>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            extractor,
            embeddings,
            connector,
            options,
        }
    }

    pub fn index_for(&self, story_id: Option<&str>) -> String {
        index_name(&self.options.default_index, story_id)
    }

    /// Run the full pipeline for one request.
    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestionReport, IngestFailure> {
        let span = info_span!(
            "ingest_episode",
            action = %request.action,
            episode_id = %request.episode_id,
            episode_no = request.episode_no,
            version = request.version,
            index = %self.index_for(request.story_id.as_deref()),
        );

        async {
            let fail = |stage: IngestStage| {
                let episode_id = request.episode_id.clone();
                let version = request.version;
                move |error: SagaError| IngestFailure {
                    episode_id,
                    version,
                    stage,
                    error,
                }
            };

            validate_request(request).map_err(fail(IngestStage::Extracting))?;

            debug!(state = %IngestState::Extracting, "Extracting facts");
            let delta = self
                .extractor
                .extract(
                    &request.text,
                    &request.episode_id,
                    request.episode_no,
                    request.version,
                )
                .await
                .map_err(fail(IngestStage::Extracting))?;

            self.ingest_delta(request.story_id.as_deref(), &delta)
                .await
                .map(|mut report| {
                    report.states.insert(0, IngestState::Extracting);
                    report
                })
        }
        .instrument(span)
        .await
    }

    /// Embed and upsert an already extracted delta.
    ///
    /// An empty delta completes immediately without touching the embedder or
    /// the store.
    pub async fn ingest_delta(
        &self,
        story_id: Option<&str>,
        delta: &EpisodeDelta,
    ) -> Result<IngestionReport, IngestFailure> {
        let fail = move |stage: IngestStage| {
            move |error: SagaError| IngestFailure {
                episode_id: delta.episode_id.clone(),
                version: delta.version,
                stage,
                error,
            }
        };

        let index = self.index_for(story_id);
        let mut report = IngestionReport {
            episode_id: delta.episode_id.clone(),
            episode_no: delta.episode_no,
            version: delta.version,
            index: index.clone(),
            facts_count: delta.facts.len(),
            world_facts_count: delta.world_fact_count(),
            character_facts_count: delta.character_fact_count(),
            vector_ids: Vec::new(),
            superseded: None,
            superseded_by: None,
            states: Vec::new(),
        };

        if delta.is_empty() {
            info!(episode_id = %delta.episode_id, "No facts extracted; nothing to write");
            report.states.push(IngestState::Done);
            return Ok(report);
        }

        let metadata = delta.metadata().map_err(|e| {
            fail(IngestStage::Extracting)(SagaError::extraction(format!(
                "extracted facts cannot be stored: {}",
                e
            )))
        })?;

        report.states.push(IngestState::Embedding);
        debug!(count = metadata.len(), model = self.embeddings.model_name(), "Embedding facts");
        let texts: Vec<String> = metadata.iter().map(|m| m.text.clone()).collect();
        let vectors = self
            .embeddings
            .embed_batch(&texts)
            .await
            .map_err(fail(IngestStage::Embedding))?;

        report.states.push(IngestState::Upserting);
        let records: Vec<VectorRecord> = metadata
            .into_iter()
            .zip(vectors)
            .map(|(metadata, embedding)| MemoryVectorRecord { metadata, embedding }.into())
            .collect();
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();

        let store = self
            .connector
            .connect()
            .await
            .map_err(|e| fail(IngestStage::Upserting)(into_write_error(e)))?;
        let written = self.write(store.as_ref(), &index, delta, records, &ids).await;
        release_session(store.as_ref()).await;
        let outcome = written.map_err(fail(IngestStage::Upserting))?;
        report.superseded = outcome.superseded;
        report.superseded_by = outcome.superseded_by;

        if outcome.superseded_by.is_none() {
            report.vector_ids = ids;
        }
        report.states.push(IngestState::Done);
        info!(
            episode_id = %delta.episode_id,
            version = delta.version,
            facts = report.facts_count,
            world = report.world_facts_count,
            character = report.character_facts_count,
            index = %index,
            "Episode ingested"
        );
        Ok(report)
    }

    async fn write(
        &self,
        store: &dyn VectorStore,
        index: &str,
        delta: &EpisodeDelta,
        records: Vec<VectorRecord>,
        ids: &[String],
    ) -> SagaResult<WriteOutcome> {
        store
            .ensure_index(index, self.options.dimension, self.options.metric)
            .await
            .map_err(into_write_error)?;

        if !self.options.supersede_prior_versions {
            store.upsert(index, records).await.map_err(into_write_error)?;
            return Ok(WriteOutcome::default());
        }

        // A redelivered older version must not land next to a newer one.
        if let Some(newer) = newer_version(store, index, delta).await? {
            info!(newer, "A newer version is already stored; skipping write");
            return Ok(WriteOutcome {
                superseded: None,
                superseded_by: Some(newer),
            });
        }

        store.upsert(index, records).await.map_err(into_write_error)?;

        // The new version is fully written at this point; a failure here leaves
        // stale records next to it, which a retry of the same request removes.
        let stale = superseded_filter(&delta.episode_id, delta.version, ids);
        let removed = store
            .delete_by_filter(index, &stale)
            .await
            .map_err(|e| partial_write(e, ids.len()))?;
        if removed.unwrap_or(0) > 0 {
            debug!(removed = ?removed, "Removed superseded records");
        }

        // A newer version may have finished while this one was upserting.
        if let Some(newer) = newer_version(store, index, delta).await? {
            info!(newer, "A newer version was written concurrently; removing this version");
            store
                .delete_by_filter(index, &episode_filter(&delta.episode_id, Some(delta.version)))
                .await
                .map_err(|e| partial_write(e, ids.len()))?;
            return Ok(WriteOutcome {
                superseded: removed,
                superseded_by: Some(newer),
            });
        }

        Ok(WriteOutcome {
            superseded: removed,
            superseded_by: None,
        })
    }

    /// Delete every record of `episode_id`, or only those of `version`.
    pub async fn purge_episode(
        &self,
        story_id: Option<&str>,
        episode_id: &str,
        version: Option<u32>,
    ) -> SagaResult<Option<u64>> {
        if episode_id.is_empty() || episode_id.contains(':') {
            return Err(SagaError::invalid_identifier("episodeId", episode_id));
        }
        let index = self.index_for(story_id);
        let filter = episode_filter(episode_id, version);

        let store = self.connector.connect().await.map_err(into_write_error)?;
        let result = store.delete_by_filter(&index, &filter).await;
        release_session(store.as_ref()).await;

        let removed = match result {
            Err(e) if e.code() == ErrorCode::VecIndexNotFound => Some(0),
            other => other.map_err(into_write_error)?,
        };
        info!(episode_id, version, index = %index, removed = ?removed, "Purged episode");
        Ok(removed)
    }
}

#[derive(Debug, Default)]
struct WriteOutcome {
    superseded: Option<u64>,
    superseded_by: Option<u32>,
}

/// Highest stored version of the delta's episode above the delta's own.
async fn newer_version(
    store: &dyn VectorStore,
    index: &str,
    delta: &EpisodeDelta,
) -> SagaResult<Option<u32>> {
    let filter = newer_version_filter(&delta.episode_id, delta.version);
    let records = match store.list(index, Some(&filter), NEWER_VERSION_SCAN).await {
        Ok(records) => records,
        Err(e) if e.code() == ErrorCode::VecIndexNotFound => return Ok(None),
        Err(e) => return Err(into_write_error(e)),
    };
    Ok(records
        .iter()
        .filter_map(|r| r.payload.get(fields::VERSION).and_then(|v| v.as_u64()))
        .filter_map(|v| u32::try_from(v).ok())
        .max())
}

const NEWER_VERSION_SCAN: usize = 64;

fn partial_write(err: SagaError, written: usize) -> SagaError {
    warn!(error = %err, "Failed to remove superseded records");
    SagaError::StoreWrite {
        message: format!("new version written but superseded records remain: {}", err),
        code: ErrorCode::VecPartialWrite,
        partial: true,
        written,
        source: Some(Box::new(err)),
    }
}

fn validate_request(request: &IngestRequest) -> SagaResult<()> {
    // Building a throwaway id checks the episode id segment.
    VectorId::new(
        &request.episode_id,
        request.version,
        crate::types::MemoryScope::World,
        None,
        0,
    )?;
    if request.episode_no == 0 {
        return Err(SagaError::validation("episodeNo starts at 1"));
    }
    if request.version == 0 {
        return Err(SagaError::validation("version starts at 1"));
    }
    Ok(())
}

fn into_write_error(err: SagaError) -> SagaError {
    match err {
        SagaError::StoreWrite { .. } => err,
        other => SagaError::StoreWrite {
            message: other.to_string(),
            code: ErrorCode::VecWriteFailed,
            partial: false,
            written: 0,
            source: Some(Box::new(other)),
        },
    }
}
