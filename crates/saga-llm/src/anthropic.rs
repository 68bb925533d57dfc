//! Anthropic (Claude) LLM provider implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use saga_core::error::{SagaError, SagaResult};
use saga_core::traits::{
    GenerationOptions, Llm, LlmConfig, LlmResponse, ResponseFormat, TokenUsage, Tool, ToolCall,
    ToolChoice,
};
use saga_core::types::{Message, MessageRole};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";

/// Anthropic LLM provider.
pub struct AnthropicLlm {
    client: Client,
    config: LlmConfig,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, PartialEq)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

impl AnthropicLlm {
    /// Create a new Anthropic LLM provider.
    pub fn new(config: LlmConfig) -> SagaResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                SagaError::Configuration("Anthropic API key not found. Set ANTHROPIC_API_KEY environment variable or provide api_key in config.".to_string())
            })?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-api-key",
            api_key
                .parse()
                .map_err(|_| SagaError::Configuration("Invalid API key format".to_string()))?,
        );
        headers.insert(
            "anthropic-version",
            reqwest::header::HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| SagaError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| ANTHROPIC_API_URL.to_string());

        let mut config = config;
        if config.model.is_empty() {
            config.model = DEFAULT_MODEL.to_string();
        }

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    async fn send(&self, request: &AnthropicRequest<'_>) -> SagaResult<LlmResponse> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| SagaError::llm(format!("Anthropic API request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SagaError::llm(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(SagaError::llm(format!(
                "Anthropic API error ({}): {}",
                status, message
            )));
        }

        let response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| SagaError::llm(format!("Failed to parse response: {}", e)))?;
        Ok(into_llm_response(response))
    }

    fn request<'a>(
        &'a self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> AnthropicRequest<'a> {
        let (mut system, messages) = convert_messages(messages);
        // No native JSON mode; restate the requirement in the system prompt.
        if matches!(options.response_format, Some(ResponseFormat::Json)) {
            let note = "Respond with a single JSON object and nothing else.";
            system = Some(match system {
                Some(s) => format!("{}\n\n{}", s, note),
                None => note.to_string(),
            });
        }
        AnthropicRequest {
            model: &self.config.model,
            max_tokens: options.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: Some(options.temperature.unwrap_or(self.config.temperature)),
            system,
            messages,
            tools: Vec::new(),
            tool_choice: None,
        }
    }
}

/// Split out system text and fold the rest into alternating user/assistant
/// turns. Tool results travel as `tool_result` blocks in a user turn.
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect();
    let system = (!system.is_empty()).then(|| system.join("\n\n"));

    let mut converted: Vec<AnthropicMessage> = Vec::new();
    for message in messages.iter().filter(|m| m.role != MessageRole::System) {
        let (role, blocks) = match message.role {
            MessageRole::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: message.content.clone(),
                    });
                }
                blocks.extend(message.tool_calls.iter().map(|call| ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments_value(),
                }));
                ("assistant", blocks)
            }
            MessageRole::Tool => (
                "user",
                vec![ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message.content.clone(),
                }],
            ),
            _ => (
                "user",
                vec![ContentBlock::Text {
                    text: message.content.clone(),
                }],
            ),
        };
        if blocks.is_empty() {
            continue;
        }
        match converted.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => converted.push(AnthropicMessage {
                role,
                content: blocks,
            }),
        }
    }
    (system, converted)
}

fn convert_tool_choice(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Auto => serde_json::json!({ "type": "auto" }),
        ToolChoice::None => serde_json::json!({ "type": "none" }),
        ToolChoice::Required => serde_json::json!({ "type": "any" }),
        ToolChoice::Specific(name) => serde_json::json!({ "type": "tool", "name": name }),
    }
}

fn into_llm_response(response: AnthropicResponse) -> LlmResponse {
    let mut text = Vec::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block.content_type.as_str() {
            "text" => text.extend(block.text),
            "tool_use" => {
                let arguments: HashMap<String, serde_json::Value> = match block.input {
                    Some(serde_json::Value::Object(map)) => map.into_iter().collect(),
                    _ => HashMap::new(),
                };
                tool_calls.push(ToolCall {
                    id: block.id.unwrap_or_default(),
                    name: block.name.unwrap_or_default(),
                    arguments,
                });
            }
            _ => {}
        }
    }

    let usage = response.usage.map(|u| TokenUsage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
        total_tokens: u.input_tokens + u.output_tokens,
    });

    LlmResponse {
        content: (!text.is_empty()).then(|| text.join("")),
        tool_calls,
        usage,
    }
}

#[async_trait]
impl Llm for AnthropicLlm {
    async fn generate(
        &self,
        messages: &[Message],
        options: Option<GenerationOptions>,
    ) -> SagaResult<LlmResponse> {
        let options = options.unwrap_or_default();
        self.send(&self.request(messages, &options)).await
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[Tool],
        tool_choice: ToolChoice,
        options: Option<GenerationOptions>,
    ) -> SagaResult<LlmResponse> {
        let options = options.unwrap_or_default();
        let mut request = self.request(messages, &options);
        request.tools = tools
            .iter()
            .map(|tool| AnthropicTool {
                name: &tool.name,
                description: &tool.description,
                input_schema: &tool.parameters,
            })
            .collect();
        if !request.tools.is_empty() {
            request.tool_choice = Some(convert_tool_choice(&tool_choice));
        }
        self.send(&request).await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn supports_json_mode(&self) -> bool {
        false
    }
}
