//! Input and output shapes of the `recall-memory` tool.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::retrieval::RetrievedMemory;
use crate::traits::Tool;
use crate::types::MemoryScope;

/// Name the conversational LLM calls the recall capability by.
pub const RECALL_TOOL_NAME: &str = "recall-memory";

/// Most memories one recall call may return.
pub const MAX_RECALL_TOP_K: usize = 50;

/// Input for the recall tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallInput {
    /// What to remember: a scene description, a question, a name.
    pub query: String,
    /// Maximum memories to return; the agent's default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

impl RecallInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// One memory as shown to the conversational layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalledMemory {
    pub text: String,
    pub episode_no: u32,
    pub importance: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<MemoryScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl From<RetrievedMemory> for RecalledMemory {
    fn from(memory: RetrievedMemory) -> Self {
        let character_id = memory.metadata.owner().map(str::to_string);
        Self {
            text: memory.text,
            episode_no: memory.metadata.episode_no,
            importance: memory.metadata.importance,
            scope: Some(memory.metadata.scope),
            character_id,
            score: Some(memory.score),
        }
    }
}

/// Output of the recall tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallOutput {
    pub memories: Vec<RecalledMemory>,
    pub count: usize,
    /// The filter the store evaluated, for debugging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_filter: Option<serde_json::Value>,
}

impl RecallOutput {
    pub fn new(memories: Vec<RecalledMemory>) -> Self {
        Self {
            count: memories.len(),
            memories,
            applied_filter: None,
        }
    }
}

/// Tool definition handed to the conversational LLM.
pub fn recall_tool(character_name: &str) -> Tool {
    Tool::new(
        RECALL_TOOL_NAME,
        format!(
            "Search {}'s memories of earlier episodes. Returns facts the character \
             witnessed or privately knows, most relevant first. Anything not returned \
             is something the character does not remember.",
            character_name
        ),
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to remember: a scene, a question, a person or a place"
                },
                "topK": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_RECALL_TOP_K,
                    "description": "Maximum number of memories to return"
                }
            },
            "required": ["query"]
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EpisodeDelta, MemoryFact};

    #[test]
    fn test_recall_input_defaults() {
        let input: RecallInput = serde_json::from_str(r#"{"query": "the cafe"}"#).unwrap();
        assert_eq!(input.top_k, None);
        let input: RecallInput = serde_json::from_str(r#"{"query": "x", "topK": 3}"#).unwrap();
        assert_eq!(input.top_k, Some(3));
    }

    #[test]
    fn test_output_shape() {
        let delta = EpisodeDelta::new("episode-1", 1, 1, vec![MemoryFact::world("X is the cafe owner", 3)]);
        let metadata = delta.metadata().unwrap().remove(0);
        let memory = RecalledMemory::from(RetrievedMemory {
            text: metadata.text.clone(),
            score: 0.5,
            metadata,
        });
        let output = serde_json::to_value(RecallOutput::new(vec![memory])).unwrap();

        assert_eq!(output["count"], 1);
        assert_eq!(output["memories"][0]["text"], "X is the cafe owner");
        assert_eq!(output["memories"][0]["episodeNo"], 1);
        assert_eq!(output["memories"][0]["importance"], 3);
        assert_eq!(output["memories"][0]["scope"], "world");
        assert!(output["memories"][0].get("characterId").is_none());
        assert!(output.get("appliedFilter").is_none());
    }
}
