//! Character agent shell.
//!
//! Binds a character identity and the current episode to the retrieval
//! engine, and exposes recall as the single tool of a conversational loop.

mod character;
mod persona;
mod tools;

pub use character::{AgentReply, CharacterAgent, RecallPolicy};
pub use persona::character_instructions;
pub use tools::{
    recall_tool, RecallInput, RecallOutput, RecalledMemory, MAX_RECALL_TOP_K, RECALL_TOOL_NAME,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::{SagaError, SagaResult};
use crate::retrieval::RetrievalEngine;
use crate::traits::Llm;
use crate::types::{CharacterInfo, CharacterRegistry, Message};

/// Reply of a one-shot conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TalkResponse {
    pub character_name: String,
    pub response: String,
}

/// Creates agents for any character in the registry.
pub struct CharacterAgentFactory {
    registry: Arc<CharacterRegistry>,
    engine: Arc<RetrievalEngine>,
    llm: Arc<dyn Llm>,
    retrieval: RetrievalConfig,
}

impl CharacterAgentFactory {
    pub fn new(
        registry: Arc<CharacterRegistry>,
        engine: Arc<RetrievalEngine>,
        llm: Arc<dyn Llm>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            llm,
            retrieval,
        }
    }

    /// Character ids in registry order.
    pub fn available_characters(&self) -> Vec<String> {
        self.registry.ids().map(str::to_string).collect()
    }

    pub fn character_info(&self, character_id: &str) -> Option<&CharacterInfo> {
        self.registry.get(character_id)
    }

    /// Agent for `character_id` at `current_episode_no`.
    pub fn create(
        &self,
        character_id: &str,
        current_episode_no: u32,
        story_id: Option<&str>,
    ) -> SagaResult<CharacterAgent> {
        let character = self
            .registry
            .get(character_id)
            .cloned()
            .ok_or_else(|| SagaError::invalid_identifier("character id", character_id))?;
        Ok(
            CharacterAgent::new(character, current_episode_no, self.engine.clone(), self.llm.clone())
                .with_story(story_id.map(str::to_string))
                .with_policy(RecallPolicy::from(&self.retrieval))
                .with_max_tool_rounds(self.retrieval.max_tool_rounds),
        )
    }

    /// Send one message to a character with no prior history.
    pub async fn talk_as_character(
        &self,
        character_id: &str,
        current_episode_no: u32,
        message: &str,
        story_id: Option<&str>,
    ) -> SagaResult<TalkResponse> {
        let agent = self.create(character_id, current_episode_no, story_id)?;
        let reply = agent.respond(&[] as &[Message], message).await?;
        Ok(TalkResponse {
            character_name: agent.character().name.clone(),
            response: reply.text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{testing::HashEmbedder, EmbeddingBatcher};
    use crate::testing::RecordingStore;
    use crate::traits::{LlmResponse, MockLlm};

    fn registry() -> Arc<CharacterRegistry> {
        Arc::new(CharacterRegistry::new(vec![
            CharacterInfo::new("himuro-nigo", "Nigo Himuro", "A student who can stop time"),
            CharacterInfo::new("misaki", "Misaki", "Nigo's sister"),
        ]))
    }

    fn factory(llm: MockLlm) -> CharacterAgentFactory {
        let store = RecordingStore::default();
        let embeddings = EmbeddingBatcher::new(Arc::new(HashEmbedder::new(4)), 8, 4);
        let engine = Arc::new(RetrievalEngine::new(
            Arc::new(store),
            embeddings,
            "character-memory",
        ));
        CharacterAgentFactory::new(registry(), engine, Arc::new(llm), RetrievalConfig::default())
    }

    #[test]
    fn test_available_characters_in_order() {
        let factory = factory(MockLlm::new());
        assert_eq!(factory.available_characters(), vec!["himuro-nigo", "misaki"]);
        assert_eq!(factory.character_info("misaki").unwrap().name, "Misaki");
        assert!(factory.character_info("nobody").is_none());
    }

    #[test]
    fn test_create_unknown_character() {
        let factory = factory(MockLlm::new());
        assert!(matches!(
            factory.create("nobody", 2, None),
            Err(SagaError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_talk_as_character() {
        let mut llm = MockLlm::new();
        llm.expect_generate_with_tools()
            .times(1)
            .returning(|messages, _, _, _| {
                assert!(messages[0].content.starts_with("You are Misaki."));
                Ok(LlmResponse::text("Big brother? He's fine!"))
            });
        let factory = factory(llm);

        let reply = factory
            .talk_as_character("misaki", 1, "How is Nigo?", None)
            .await
            .unwrap();
        assert_eq!(reply.character_name, "Misaki");
        assert_eq!(reply.response, "Big brother? He's fine!");

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["characterName"], "Misaki");
    }
}
