//! Knowledge isolation end to end against the in-memory store.

mod common;

use std::sync::Arc;

use common::{cafe_episode, Harness, INDEX};
use saga_core::ingestion::IngestState;
use saga_core::traits::VectorStore;
use saga_core::types::{MemoryFact, MemoryScope};
use saga_core::{ErrorCode, MemoryQuery};
use saga_vector_stores::MemoryVectorStore;

fn harness() -> Harness {
    Harness::new(Arc::new(MemoryVectorStore::new()))
}

#[tokio::test]
async fn test_single_world_fact_id() {
    let h = harness();
    h.extractor
        .script("episode-1", 1, vec![MemoryFact::world("The cafe opens at seven", 2)]);

    let report = h.ingest("episode-1", 1, 1).await;
    assert_eq!(report.vector_ids, vec!["vec:episode-1:v1:world:world:0"]);
    assert_eq!(report.index, INDEX);
    assert_eq!(
        report.states,
        vec![
            IngestState::Extracting,
            IngestState::Embedding,
            IngestState::Upserting,
            IngestState::Done
        ]
    );

    let stored = h.stored().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].scope, MemoryScope::World);
    assert_eq!(stored[0].character_id, "world");
    assert_eq!(stored[0].episode_no, 1);
}

#[tokio::test]
async fn test_private_facts_stay_private() {
    let h = harness();
    h.extractor.script("episode-1", 1, cafe_episode());
    h.ingest("episode-1", 1, 1).await;

    let misaki = h.recall("misaki", 2, "Tsubasa cafe government Nigo").await;
    assert_eq!(misaki, vec!["Tsubasa runs the Blue Moon cafe near the station"]);

    let tsubasa = h.recall("genshin-tsubasa", 2, "Tsubasa cafe government Nigo").await;
    assert_eq!(tsubasa.len(), 2);
    assert!(tsubasa.contains(&"Tsubasa secretly reports on Nigo to the government".to_string()));
    assert!(!tsubasa.iter().any(|t| t.contains("stopped time")));

    let nigo = h.recall("himuro-nigo", 2, "time").await;
    assert!(nigo.contains(&"Nigo stopped time to save a falling child".to_string()));
    assert!(!nigo.iter().any(|t| t.contains("reports on Nigo")));
}

#[tokio::test]
async fn test_future_episodes_are_invisible() {
    let h = harness();
    h.extractor.script("episode-1", 1, vec![MemoryFact::world("Rei arrives in town", 3)]);
    h.extractor.script("episode-2", 1, vec![MemoryFact::world("Rei reveals her amber eyes", 4)]);
    h.extractor.script("episode-3", 1, vec![MemoryFact::world("Rei leaves town", 4)]);
    h.ingest("episode-1", 1, 1).await;
    h.ingest("episode-2", 2, 1).await;
    h.ingest("episode-3", 3, 1).await;

    assert_eq!(h.recall("misaki", 2, "Rei").await, vec!["Rei arrives in town"]);
    assert_eq!(h.recall("misaki", 3, "Rei").await.len(), 2);
    assert_eq!(h.recall("misaki", 4, "Rei").await.len(), 3);
}

#[tokio::test]
async fn test_first_episode_recalls_nothing_without_embedding() {
    let h = harness();
    h.extractor.script("episode-1", 1, cafe_episode());
    h.ingest("episode-1", 1, 1).await;
    let embeds_after_ingest = h.embedder.calls();

    let outcome = h
        .engine
        .search(&MemoryQuery {
            query: "cafe".to_string(),
            current_episode_no: 1,
            active_character_id: "misaki".to_string(),
            top_k: 5,
            story_id: None,
        })
        .await
        .unwrap();
    assert!(outcome.memories.is_empty());
    assert!(outcome.applied_filter.is_none());
    assert_eq!(h.embedder.calls(), embeds_after_ingest);
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let h = harness();
    h.extractor.script("episode-1", 1, cafe_episode());
    let first = h.ingest("episode-1", 1, 1).await;
    let before = h.stored().await;
    let second = h.ingest("episode-1", 1, 1).await;

    assert_eq!(first.vector_ids, second.vector_ids);
    assert_eq!(h.stored().await, before);
}

#[tokio::test]
async fn test_empty_extraction_touches_nothing() {
    let h = harness();
    h.extractor.script("episode-4", 1, Vec::new());

    let report = h.ingest("episode-4", 4, 1).await;
    assert_eq!(report.states, vec![IngestState::Extracting, IngestState::Done]);
    assert!(report.vector_ids.is_empty());
    assert_eq!(h.embedder.calls(), 0);

    let store = h.connector.connect().await.unwrap();
    let err = store.index_info(INDEX).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::VecIndexNotFound);
}

#[tokio::test]
async fn test_new_version_supersedes_old() {
    let h = harness();
    h.extractor.script("episode-1", 1, cafe_episode());
    h.extractor
        .script("episode-1", 2, vec![MemoryFact::world("The Blue Moon cafe closed for repairs", 3)]);
    h.ingest("episode-1", 1, 1).await;
    let report = h.ingest("episode-1", 1, 2).await;

    assert_eq!(report.superseded, Some(3));
    assert_eq!(h.stored_ids().await, vec!["vec:episode-1:v2:world:world:0"]);
    assert_eq!(
        h.recall("genshin-tsubasa", 2, "cafe").await,
        vec!["The Blue Moon cafe closed for repairs"]
    );
}

#[tokio::test]
async fn test_redelivered_old_version_stays_superseded() {
    let h = harness();
    h.extractor
        .script("episode-1", 1, vec![MemoryFact::world("The cafe is called Blue Moon", 3)]);
    h.extractor
        .script("episode-1", 2, vec![MemoryFact::world("The cafe is called Red Sun", 3)]);

    h.ingest("episode-1", 1, 1).await;
    h.ingest("episode-1", 1, 2).await;
    let replay = h.ingest("episode-1", 1, 1).await;

    assert_eq!(replay.superseded_by, Some(2));
    assert!(replay.vector_ids.is_empty());
    assert_eq!(h.stored_ids().await, vec!["vec:episode-1:v2:world:world:0"]);
    assert_eq!(h.recall("misaki", 2, "cafe").await, vec!["The cafe is called Red Sun"]);
}

#[tokio::test]
async fn test_shrinking_reextraction_removes_stale_tail() {
    let h = harness();
    h.extractor.script("episode-1", 1, cafe_episode());
    h.ingest("episode-1", 1, 1).await;

    h.extractor.script(
        "episode-1",
        1,
        vec![MemoryFact::world("Tsubasa runs the Blue Moon cafe near the station", 3)],
    );
    h.ingest("episode-1", 1, 1).await;

    assert_eq!(h.stored_ids().await, vec!["vec:episode-1:v1:world:world:0"]);
}

#[tokio::test]
async fn test_purge_episode() {
    let h = harness();
    h.extractor.script("episode-1", 1, cafe_episode());
    h.extractor.script("episode-2", 1, vec![MemoryFact::world("Misaki bakes a cake", 1)]);
    h.ingest("episode-1", 1, 1).await;
    h.ingest("episode-2", 2, 1).await;

    let removed = h.pipeline.purge_episode(None, "episode-1", None).await.unwrap();
    assert_eq!(removed, Some(3));
    assert_eq!(h.stored_ids().await, vec!["vec:episode-2:v1:world:world:0"]);
}

#[tokio::test]
async fn test_stories_are_separate_indexes() {
    let h = harness();
    h.extractor.script("episode-1", 1, cafe_episode());
    let request = saga_core::ingestion::IngestRequest::new("episode-1", 1, 1, "text")
        .with_story("Time Stop Academy");
    let report = h.pipeline.ingest(&request).await.unwrap();
    assert_eq!(report.index, "character-memory-time-stop-academy");

    assert!(h.recall("genshin-tsubasa", 2, "cafe").await.is_empty());
    let outcome = h
        .engine
        .search(&MemoryQuery {
            query: "cafe".to_string(),
            current_episode_no: 2,
            active_character_id: "genshin-tsubasa".to_string(),
            top_k: 5,
            story_id: Some("Time Stop Academy".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(outcome.memories.len(), 2);
}

#[tokio::test]
async fn test_debug_dump_respects_visibility() {
    let h = harness();
    h.extractor.script("episode-1", 1, cafe_episode());
    h.extractor.script("episode-2", 1, vec![MemoryFact::world("Misaki bakes a cake", 1)]);
    h.ingest("episode-1", 1, 1).await;
    h.ingest("episode-2", 2, 1).await;

    let all = h.engine.memories_up_to(None, 2, None, 100).await.unwrap();
    assert_eq!(all.len(), 4);

    let misaki = h.engine.memories_up_to(None, 1, Some("misaki"), 100).await.unwrap();
    assert_eq!(misaki.len(), 1);
    assert_eq!(misaki[0].scope, MemoryScope::World);
}
