//! Filtered similarity search over a story's index.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

use super::filter::{build_filter, cutoff_episode, episode_listing_filter};
use crate::embedding::EmbeddingBatcher;
use crate::error::{ErrorCode, SagaError, SagaResult};
use crate::traits::{release_session, StoreConnector, VectorSearchResult, VectorStore};
use crate::types::{index_name, Filter, MemoryVectorMetadata};

/// Parameters of one recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryQuery {
    /// Scene description or user input to match against.
    pub query: String,
    /// Episode the character is currently in; memories come from earlier episodes.
    pub current_episode_no: u32,
    /// Character whose memories are searched.
    pub active_character_id: String,
    pub top_k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
}

/// One recalled fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedMemory {
    pub text: String,
    pub score: f32,
    pub metadata: MemoryVectorMetadata,
}

/// Result of a recall: ranked memories and the filter that produced them.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub memories: Vec<RetrievedMemory>,
    /// `None` when the query was short-circuited.
    pub applied_filter: Option<Filter>,
}

/// Executes recall queries under the knowledge-isolation filter.
pub struct RetrievalEngine {
    connector: Arc<dyn StoreConnector>,
    embeddings: EmbeddingBatcher,
    default_index: String,
}

impl RetrievalEngine {
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        embeddings: EmbeddingBatcher,
        default_index: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            embeddings,
            default_index: default_index.into(),
        }
    }

    pub fn index_for(&self, story_id: Option<&str>) -> String {
        index_name(&self.default_index, story_id)
    }

    /// Similarity search restricted to what the active character may remember.
    ///
    /// When the character is in the first episode nothing is embedded or
    /// queried and the outcome is empty.
    pub async fn search(&self, query: &MemoryQuery) -> SagaResult<SearchOutcome> {
        if query.active_character_id.is_empty() {
            return Err(SagaError::validation("active character id must not be empty"));
        }
        let Some(filter) = build_filter(&query.active_character_id, query.current_episode_no)
        else {
            debug!(
                episode = query.current_episode_no,
                "No earlier episodes; skipping memory search"
            );
            return Ok(SearchOutcome::default());
        };
        if query.top_k == 0 {
            return Ok(SearchOutcome {
                memories: Vec::new(),
                applied_filter: Some(filter),
            });
        }

        let index = self.index_for(query.story_id.as_deref());
        let span = info_span!(
            "memory_search",
            index = %index,
            character = %query.active_character_id,
            cutoff = cutoff_episode(query.current_episode_no),
            top_k = query.top_k,
        );

        async {
            let vector = self.embeddings.embed_query(&query.query).await?;

            let store = self.connector.connect().await.map_err(into_query_error)?;
            let result = store
                .query(&index, &vector, query.top_k, Some(&filter), false)
                .await;
            release_session(store.as_ref()).await;

            let results = match result {
                Ok(results) => results,
                Err(e) if e.code() == ErrorCode::VecIndexNotFound => {
                    debug!("Index does not exist yet; no memories");
                    Vec::new()
                }
                Err(e) => return Err(into_query_error(e)),
            };

            let memories: Vec<RetrievedMemory> =
                results.into_iter().filter_map(to_memory).collect();
            debug!(count = memories.len(), "Memory search complete");
            Ok(SearchOutcome {
                memories,
                applied_filter: Some(filter),
            })
        }
        .instrument(span)
        .await
    }

    /// Every stored fact up to and including `episode_no`, ordered by episode
    /// then fact index. With `character_id`, only facts that character may see.
    ///
    /// Episodes are read one at a time from the first, so when `limit` cuts
    /// the dump short it is the latest episodes that are left out.
    pub async fn memories_up_to(
        &self,
        story_id: Option<&str>,
        episode_no: u32,
        character_id: Option<&str>,
        limit: usize,
    ) -> SagaResult<Vec<MemoryVectorMetadata>> {
        if episode_no == 0 || limit == 0 {
            return Ok(Vec::new());
        }
        let index = self.index_for(story_id);

        let store = self.connector.connect().await.map_err(into_query_error)?;
        let result = list_episodes(store.as_ref(), &index, episode_no, character_id, limit).await;
        release_session(store.as_ref()).await;

        match result {
            Err(e) if e.code() == ErrorCode::VecIndexNotFound => Ok(Vec::new()),
            other => other,
        }
    }
}

async fn list_episodes(
    store: &dyn VectorStore,
    index: &str,
    episode_no: u32,
    character_id: Option<&str>,
    limit: usize,
) -> SagaResult<Vec<MemoryVectorMetadata>> {
    let mut memories = Vec::new();
    for episode in 1..=episode_no {
        let remaining = limit - memories.len();
        if remaining == 0 {
            break;
        }
        let filter = episode_listing_filter(episode, character_id);
        let mut batch = list_metadata(store, index, &filter, remaining).await?;
        batch.sort_by_key(|m| (m.version, m.fact_index));
        memories.append(&mut batch);
    }
    Ok(memories)
}

async fn list_metadata(
    store: &dyn VectorStore,
    index: &str,
    filter: &Filter,
    limit: usize,
) -> SagaResult<Vec<MemoryVectorMetadata>> {
    let records = store
        .list(index, Some(filter), limit)
        .await
        .map_err(|e| match e.code() {
            ErrorCode::VecIndexNotFound => e,
            _ => into_query_error(e),
        })?;
    Ok(records
        .into_iter()
        .filter_map(|record| match MemoryVectorMetadata::from_payload(&record.payload) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(id = %record.id, error = %e, "Skipping record with malformed payload");
                None
            }
        })
        .collect())
}

fn to_memory(result: VectorSearchResult) -> Option<RetrievedMemory> {
    match result.metadata() {
        Ok(metadata) => Some(RetrievedMemory {
            text: metadata.text.clone(),
            score: result.score,
            metadata,
        }),
        Err(e) => {
            warn!(id = %result.id, error = %e, "Skipping result with malformed payload");
            None
        }
    }
}

fn into_query_error(err: SagaError) -> SagaError {
    match err {
        SagaError::StoreQuery { .. } => err,
        other => SagaError::StoreQuery {
            message: other.to_string(),
            code: ErrorCode::VecQueryFailed,
            source: Some(Box::new(other)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::HashEmbedder;
    use crate::testing::RecordingStore;
    use crate::types::{EpisodeDelta, MemoryFact};

    fn engine(store: Arc<RecordingStore>) -> RetrievalEngine {
        RetrievalEngine::new(
            store,
            EmbeddingBatcher::new(Arc::new(HashEmbedder::new(4)), 8, 4),
            "character-memory",
        )
    }

    fn query(character: &str, episode: u32) -> MemoryQuery {
        MemoryQuery {
            query: "who runs the cafe?".to_string(),
            current_episode_no: episode,
            active_character_id: character.to_string(),
            top_k: 5,
            story_id: None,
        }
    }

    fn seed(store: &RecordingStore) {
        let delta = EpisodeDelta::new(
            "episode-1",
            1,
            1,
            vec![
                MemoryFact::world("X is the cafe owner", 3),
                MemoryFact::character("a", "A knows the safe code", 4),
            ],
        );
        store.seed("character-memory", &delta);
    }

    #[tokio::test]
    async fn test_first_episode_short_circuits() {
        let store = Arc::new(RecordingStore::default());
        seed(&store);
        let outcome = engine(store.clone()).search(&query("a", 1)).await.unwrap();
        assert!(outcome.memories.is_empty());
        assert!(outcome.applied_filter.is_none());
        assert_eq!(store.connects(), 0);
        assert_eq!(store.queries(), 0);
    }

    #[tokio::test]
    async fn test_scope_isolation() {
        let store = Arc::new(RecordingStore::default());
        seed(&store);
        let engine = engine(store.clone());

        let as_b = engine.search(&query("b", 3)).await.unwrap();
        assert_eq!(as_b.memories.len(), 1);
        assert_eq!(as_b.memories[0].text, "X is the cafe owner");

        let as_a = engine.search(&query("a", 3)).await.unwrap();
        assert_eq!(as_a.memories.len(), 2);

        assert_eq!(store.connects(), store.disconnects());
    }

    #[tokio::test]
    async fn test_query_failure_is_store_query_error_and_releases() {
        let store = Arc::new(RecordingStore::default());
        store.fail_queries();
        let err = engine(store.clone()).search(&query("a", 2)).await.unwrap_err();
        assert!(matches!(err, SagaError::StoreQuery { .. }));
        assert_eq!(store.connects(), 1);
        assert_eq!(store.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_missing_index_means_no_memories() {
        let store = Arc::new(RecordingStore::default());
        let outcome = engine(store).search(&query("a", 5)).await.unwrap();
        assert!(outcome.memories.is_empty());
        assert!(outcome.applied_filter.is_some());
    }

    #[tokio::test]
    async fn test_memories_up_to_is_inclusive_and_ordered() {
        let store = Arc::new(RecordingStore::default());
        seed(&store);
        store.seed(
            "character-memory",
            &EpisodeDelta::new("episode-2", 2, 1, vec![MemoryFact::world("Rain all day", 1)]),
        );
        let engine = engine(store);

        let all = engine.memories_up_to(None, 1, None, 100).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].fact_index, 0);

        let as_b = engine.memories_up_to(None, 2, Some("b"), 100).await.unwrap();
        let texts: Vec<_> = as_b.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["X is the cafe owner", "Rain all day"]);
    }

    #[tokio::test]
    async fn test_memories_up_to_limit_keeps_earliest_episodes() {
        let store = Arc::new(RecordingStore::default());
        for no in [2, 10] {
            store.seed(
                "character-memory",
                &EpisodeDelta::new(
                    format!("episode-{no}"),
                    no,
                    1,
                    vec![MemoryFact::world(format!("Happened in episode {no}"), 1)],
                ),
            );
        }
        let engine = engine(store.clone());

        let dump = engine.memories_up_to(None, 10, None, 1).await.unwrap();
        assert_eq!(dump.len(), 1);
        assert_eq!(dump[0].episode_no, 2);
        assert_eq!(store.connects(), store.disconnects());
    }
}
