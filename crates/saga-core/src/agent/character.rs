//! A character bound to a point in the story.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

use super::persona::character_instructions;
use super::tools::{
    recall_tool, RecallInput, RecallOutput, RecalledMemory, MAX_RECALL_TOP_K, RECALL_TOOL_NAME,
};
use crate::config::RetrievalConfig;
use crate::error::{SagaError, SagaResult};
use crate::retrieval::{MemoryQuery, RetrievalEngine};
use crate::traits::{Llm, Tool, ToolCall, ToolChoice};
use crate::types::{CharacterInfo, Message};

/// How recall behaves inside a conversation.
#[derive(Debug, Clone)]
pub struct RecallPolicy {
    /// Result count when the tool call does not name one.
    pub default_top_k: usize,
    /// Answer "no memories" instead of failing the turn when the store query fails.
    pub degrade_on_query_failure: bool,
    /// Include the applied filter in tool output.
    pub include_applied_filter: bool,
}

impl Default for RecallPolicy {
    fn default() -> Self {
        RecallPolicy::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RecallPolicy {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            default_top_k: config.recall_top_k,
            degrade_on_query_failure: config.degrade_on_query_failure,
            include_applied_filter: config.include_applied_filter,
        }
    }
}

/// Final answer of one conversational turn.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReply {
    pub text: String,
    /// Every memory returned by recall during the turn, in call order.
    pub memories: Vec<RecalledMemory>,
}

/// Conversational agent for one character at one episode.
///
/// The character and episode are fixed at construction; the only way the
/// LLM can learn about the past is the bound recall tool, which always
/// applies the character's visibility filter.
pub struct CharacterAgent {
    character: CharacterInfo,
    current_episode_no: u32,
    story_id: Option<String>,
    engine: Arc<RetrievalEngine>,
    llm: Arc<dyn Llm>,
    policy: RecallPolicy,
    max_tool_rounds: usize,
}

impl CharacterAgent {
    pub fn new(
        character: CharacterInfo,
        current_episode_no: u32,
        engine: Arc<RetrievalEngine>,
        llm: Arc<dyn Llm>,
    ) -> Self {
        Self {
            character,
            current_episode_no,
            story_id: None,
            engine,
            llm,
            policy: RecallPolicy::default(),
            max_tool_rounds: RetrievalConfig::default().max_tool_rounds,
        }
    }

    pub fn with_story(mut self, story_id: Option<String>) -> Self {
        self.story_id = story_id;
        self
    }

    pub fn with_policy(mut self, policy: RecallPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn character(&self) -> &CharacterInfo {
        &self.character
    }

    pub fn current_episode_no(&self) -> u32 {
        self.current_episode_no
    }

    pub fn instructions(&self) -> String {
        character_instructions(&self.character, self.current_episode_no)
    }

    pub fn recall_tool(&self) -> Tool {
        recall_tool(&self.character.name)
    }

    /// Search this character's memories from earlier episodes.
    pub async fn recall(&self, input: RecallInput) -> SagaResult<RecallOutput> {
        let query = MemoryQuery {
            query: input.query,
            current_episode_no: self.current_episode_no,
            active_character_id: self.character.id.clone(),
            top_k: input
                .top_k
                .unwrap_or(self.policy.default_top_k)
                .min(MAX_RECALL_TOP_K),
            story_id: self.story_id.clone(),
        };

        let outcome = match self.engine.search(&query).await {
            Ok(outcome) => outcome,
            Err(e @ SagaError::StoreQuery { .. }) if self.policy.degrade_on_query_failure => {
                warn!(
                    character = %self.character.id,
                    error = %e,
                    "Memory search failed; continuing without memories"
                );
                return Ok(RecallOutput::default());
            }
            Err(e) => return Err(e),
        };

        let mut output = RecallOutput::new(
            outcome
                .memories
                .into_iter()
                .map(RecalledMemory::from)
                .collect(),
        );
        if self.policy.include_applied_filter {
            output.applied_filter = outcome.applied_filter.as_ref().map(|f| f.to_json());
        }
        Ok(output)
    }

    /// Run one conversational turn.
    ///
    /// The LLM may call the recall tool up to `max_tool_rounds` times; after
    /// that it is asked for a final answer without tools.
    pub async fn respond(&self, history: &[Message], message: &str) -> SagaResult<AgentReply> {
        let span = info_span!(
            "character_turn",
            character = %self.character.id,
            episode = self.current_episode_no,
        );
        async {
            let mut messages = Vec::with_capacity(history.len() + 2);
            messages.push(Message::system(self.instructions()));
            messages.extend_from_slice(history);
            messages.push(Message::user(message));

            let tools = [self.recall_tool()];
            let mut consulted = Vec::new();

            for round in 0..self.max_tool_rounds {
                let response = self
                    .llm
                    .generate_with_tools(&messages, &tools, ToolChoice::Auto, None)
                    .await?;
                if response.tool_calls.is_empty() {
                    return Ok(AgentReply {
                        text: response.content.unwrap_or_default(),
                        memories: consulted,
                    });
                }

                debug!(round, calls = response.tool_calls.len(), "Executing tool calls");
                messages.push(Message::assistant_tool_calls(
                    response.content_or_empty(),
                    response.tool_calls.clone(),
                ));
                for call in &response.tool_calls {
                    let content = self.execute_tool(call, &mut consulted).await?;
                    messages.push(Message::tool_result(call, content));
                }
            }

            debug!("Tool rounds exhausted; requesting final answer");
            let response = self.llm.generate(&messages, None).await?;
            Ok(AgentReply {
                text: response.content.unwrap_or_default(),
                memories: consulted,
            })
        }
        .instrument(span)
        .await
    }

    /// Execute one tool call and render its result for the LLM.
    ///
    /// Malformed calls are answered with an error object so the model can
    /// correct itself; store failures end the turn unless degraded.
    async fn execute_tool(
        &self,
        call: &ToolCall,
        consulted: &mut Vec<RecalledMemory>,
    ) -> SagaResult<String> {
        if call.name != RECALL_TOOL_NAME {
            warn!(tool = %call.name, "LLM called an unknown tool");
            return Ok(json!({ "error": format!("unknown tool '{}'", call.name) }).to_string());
        }
        let input: RecallInput = match serde_json::from_value(call.arguments_value()) {
            Ok(input) => input,
            Err(e) => {
                return Ok(json!({ "error": format!("invalid arguments: {}", e) }).to_string());
            }
        };

        let output = self.recall(input).await?;
        consulted.extend(output.memories.iter().cloned());
        Ok(serde_json::to_string(&output)?)
    }
}
