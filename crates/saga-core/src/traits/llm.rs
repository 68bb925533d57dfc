//! LLM trait and related types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::SagaResult;
use crate::types::Message;

/// Tool definition for function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema for parameters.
    pub parameters: serde_json::Value,
}

impl Tool {
    /// Create a new tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Tool call returned by LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back with the result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool arguments as key-value pairs.
    pub arguments: HashMap<String, serde_json::Value>,
}

impl ToolCall {
    /// Arguments as a JSON object, for deserializing into a typed input.
    pub fn arguments_value(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.arguments
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Response from LLM generation.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    /// Generated text content.
    pub content: Option<String>,
    /// Tool calls (if any).
    pub tool_calls: Vec<ToolCall>,
    /// Token usage statistics.
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    /// Plain text response without tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Get the content or an empty string.
    pub fn content_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Total tokens.
    pub total_tokens: u32,
}

/// Configuration options for LLM generation.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Response format.
    pub response_format: Option<ResponseFormat>,
}

/// Response format for LLM output.
#[derive(Debug, Clone)]
pub enum ResponseFormat {
    /// Plain text response.
    Text,
    /// JSON object response.
    Json,
}

/// Tool choice specification.
#[derive(Debug, Clone, Default)]
pub enum ToolChoice {
    /// Let the model decide.
    #[default]
    Auto,
    /// Don't use tools.
    None,
    /// Must use a tool.
    Required,
    /// Use a specific tool.
    Specific(String),
}

/// Core LLM trait - all LLM providers implement this.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Llm: Send + Sync {
    /// Generate a response from the LLM.
    async fn generate(
        &self,
        messages: &[Message],
        options: Option<GenerationOptions>,
    ) -> SagaResult<LlmResponse>;

    /// Generate a response with tool calling support.
    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[Tool],
        tool_choice: ToolChoice,
        options: Option<GenerationOptions>,
    ) -> SagaResult<LlmResponse>;

    /// Get the model name.
    fn model_name(&self) -> &str;

    /// Check if this model supports JSON mode.
    fn supports_json_mode(&self) -> bool {
        true
    }
}

/// LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model name/identifier.
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// API key (if not using environment variable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL for API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    4000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key: None,
            base_url: None,
        }
    }
}
