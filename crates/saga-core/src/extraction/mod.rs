//! Fact extraction: episode text in, validated [`EpisodeDelta`] out.
//!
//! The LLM decides which statements are public and which are private; this
//! module enforces the structure. Extraction is all-or-nothing: one invalid
//! fact rejects the whole episode.

pub mod json_parser;
pub mod prompts;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{SagaError, SagaResult};
use crate::traits::{GenerationOptions, Llm, ResponseFormat};
use crate::types::{
    CharacterRegistry, EpisodeDelta, MemoryFact, Message, MAX_IMPORTANCE, MIN_IMPORTANCE,
};

pub use json_parser::{parse_extraction, ExtractedMemory, RawFact};

/// Turns raw episode text into an [`EpisodeDelta`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FactExtractor: Send + Sync {
    async fn extract(
        &self,
        episode_text: &str,
        episode_id: &str,
        episode_no: u32,
        version: u32,
    ) -> SagaResult<EpisodeDelta>;
}

/// Convert one reported importance, rejecting non-integral and out-of-range values.
fn importance(raw: f64) -> SagaResult<u8> {
    if raw.fract() != 0.0 || raw < MIN_IMPORTANCE as f64 || raw > MAX_IMPORTANCE as f64 {
        return Err(SagaError::extraction(format!(
            "importance {} is not an integer in {}..={}",
            raw, MIN_IMPORTANCE, MAX_IMPORTANCE
        )));
    }
    Ok(raw as u8)
}

impl ExtractedMemory {
    /// Validate against the registry and flatten into canonical fact order:
    /// world facts first, then each character's facts in registry order.
    pub fn into_facts(self, registry: &CharacterRegistry) -> SagaResult<Vec<MemoryFact>> {
        if let Some(unknown) = self.character_facts.keys().find(|id| !registry.contains(id)) {
            return Err(SagaError::Extraction {
                message: format!("extraction returned facts for unknown character '{}'", unknown),
                code: crate::error::ErrorCode::ExtUnknownCharacter,
                source: None,
            });
        }

        let mut facts = Vec::with_capacity(
            self.world_facts.len() + self.character_facts.values().map(Vec::len).sum::<usize>(),
        );
        for raw in self.world_facts {
            facts.push(MemoryFact::world(raw.text.trim(), importance(raw.importance)?));
        }

        let mut owned: Vec<(String, Vec<RawFact>)> = self.character_facts.into_iter().collect();
        owned.sort_by_key(|(id, _)| registry.position(id));
        for (character_id, raws) in owned {
            for raw in raws {
                facts.push(MemoryFact::character(
                    character_id.clone(),
                    raw.text.trim(),
                    importance(raw.importance)?,
                ));
            }
        }

        for fact in &facts {
            fact.validate_with(registry)
                .map_err(|e| SagaError::extraction(e.to_string()))?;
        }
        Ok(facts)
    }
}

/// Extractor backed by an LLM that answers in the extraction JSON shape.
pub struct LlmFactExtractor {
    llm: Arc<dyn Llm>,
    registry: Arc<CharacterRegistry>,
    custom_instructions: Option<String>,
}

impl LlmFactExtractor {
    pub fn new(llm: Arc<dyn Llm>, registry: Arc<CharacterRegistry>) -> Self {
        Self {
            llm,
            registry,
            custom_instructions: None,
        }
    }

    /// Replace the built-in classification instructions.
    pub fn with_custom_instructions(mut self, instructions: Option<String>) -> Self {
        self.custom_instructions = instructions;
        self
    }
}

#[async_trait]
impl FactExtractor for LlmFactExtractor {
    #[instrument(skip(self, episode_text), fields(model = self.llm.model_name()))]
    async fn extract(
        &self,
        episode_text: &str,
        episode_id: &str,
        episode_no: u32,
        version: u32,
    ) -> SagaResult<EpisodeDelta> {
        let messages = vec![
            Message::system(prompts::extraction_system_prompt(
                &self.registry,
                self.custom_instructions.as_deref(),
            )),
            Message::user(prompts::extraction_user_prompt(episode_no, episode_text)),
        ];
        let options = GenerationOptions {
            temperature: Some(0.0),
            response_format: self
                .llm
                .supports_json_mode()
                .then_some(ResponseFormat::Json),
            ..Default::default()
        };

        let response = self
            .llm
            .generate(&messages, Some(options))
            .await
            .map_err(SagaError::extraction_service)?;

        let extracted = parse_extraction(response.content_or_empty())?;
        let facts = extracted.into_facts(&self.registry)?;

        let delta = EpisodeDelta::new(episode_id, episode_no, version, facts);
        debug!(
            world = delta.world_fact_count(),
            character = delta.character_fact_count(),
            "Extracted facts"
        );
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{LlmResponse, MockLlm};
    use crate::types::{CharacterInfo, MemoryScope};

    fn registry() -> Arc<CharacterRegistry> {
        Arc::new(CharacterRegistry::new(vec![
            CharacterInfo::new("himuro-nigo", "Nigo Himuro", "A student who can stop time"),
            CharacterInfo::new("genshin-tsubasa", "Tsubasa Genshin", "Cafe manager"),
            CharacterInfo::new("kamishiro-rei", "Rei Kamishiro", "A woman with amber eyes"),
            CharacterInfo::new("misaki", "Misaki", "Nigo's sister"),
        ]))
    }

    fn llm_returning(content: &'static str) -> Arc<dyn Llm> {
        let mut llm = MockLlm::new();
        llm.expect_model_name().return_const("mock-model".to_string());
        llm.expect_supports_json_mode().return_const(true);
        llm.expect_generate()
            .times(1)
            .returning(move |_, _| Ok(LlmResponse::text(content)));
        Arc::new(llm)
    }

    #[tokio::test]
    async fn test_extract_orders_world_then_registry() {
        let llm = llm_returning(
            r#"{
                "worldFacts": [{"text": "Tsubasa runs the Blue Moon cafe", "importance": 3}],
                "characterFacts": {
                    "misaki": [{"text": "Misaki worries about her brother", "importance": 2}],
                    "genshin-tsubasa": [{"text": "Tsubasa reports on Nigo to the government", "importance": 5}],
                    "himuro-nigo": []
                }
            }"#,
        );
        let extractor = LlmFactExtractor::new(llm, registry());

        let delta = extractor.extract("...", "episode-1", 1, 1).await.unwrap();
        assert_eq!(delta.episode_id, "episode-1");
        assert_eq!(delta.facts.len(), 3);
        assert_eq!(delta.facts[0].scope, MemoryScope::World);
        assert_eq!(delta.facts[1].character_id.as_deref(), Some("genshin-tsubasa"));
        assert_eq!(delta.facts[2].character_id.as_deref(), Some("misaki"));
        assert_eq!(delta.world_fact_count(), 1);
        assert_eq!(delta.character_fact_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_character_rejects_episode() {
        let llm = llm_returning(
            r#"{"worldFacts": [{"text": "ok", "importance": 3}],
                "characterFacts": {"stranger": [{"text": "who?", "importance": 1}]}}"#,
        );
        let extractor = LlmFactExtractor::new(llm, registry());
        let err = extractor.extract("...", "episode-1", 1, 1).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ExtUnknownCharacter);
    }

    #[tokio::test]
    async fn test_out_of_range_importance_rejects_episode() {
        let llm = llm_returning(r#"{"worldFacts": [{"text": "ok", "importance": 9}]}"#);
        let extractor = LlmFactExtractor::new(llm, registry());
        assert!(matches!(
            extractor.extract("...", "episode-1", 1, 1).await,
            Err(SagaError::Extraction { .. })
        ));
    }

    #[tokio::test]
    async fn test_fractional_importance_rejected() {
        let llm = llm_returning(r#"{"worldFacts": [{"text": "ok", "importance": 2.5}]}"#);
        let extractor = LlmFactExtractor::new(llm, registry());
        assert!(extractor.extract("...", "episode-1", 1, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let llm = llm_returning(r#"{"worldFacts": [{"text": "   ", "importance": 2}]}"#);
        let extractor = LlmFactExtractor::new(llm, registry());
        assert!(matches!(
            extractor.extract("...", "episode-1", 1, 1).await,
            Err(SagaError::Extraction { .. })
        ));
    }

    #[tokio::test]
    async fn test_service_failure_is_extraction_failure() {
        let mut llm = MockLlm::new();
        llm.expect_model_name().return_const("mock-model".to_string());
        llm.expect_supports_json_mode().return_const(false);
        llm.expect_generate()
            .returning(|_, _| Err(SagaError::llm("connection reset")));
        let extractor = LlmFactExtractor::new(Arc::new(llm), registry());

        let err = extractor.extract("...", "episode-1", 1, 1).await.unwrap_err();
        assert!(matches!(err, SagaError::Extraction { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_no_facts_is_valid() {
        let llm = llm_returning(r#"{"worldFacts": [], "characterFacts": {}}"#);
        let extractor = LlmFactExtractor::new(llm, registry());
        let delta = extractor.extract("quiet day", "episode-2", 2, 1).await.unwrap();
        assert!(delta.is_empty());
    }
}
