//! OpenAI LLM provider implementation.

use async_trait::async_trait;

use saga_core::error::{SagaError, SagaResult};
use saga_core::traits::{GenerationOptions, Llm, LlmConfig, LlmResponse, Tool, ToolChoice};
use saga_core::types::Message;

#[cfg(feature = "openai")]
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionNamedToolChoice,
        ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestToolMessage,
        ChatCompletionRequestToolMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, ChatCompletionTool,
        ChatCompletionToolChoiceOption, ChatCompletionToolType, CreateChatCompletionRequest,
        FunctionCall, FunctionName, FunctionObject,
    },
    Client,
};
#[cfg(feature = "openai")]
use saga_core::traits::{ResponseFormat, TokenUsage, ToolCall};
#[cfg(feature = "openai")]
use saga_core::types::MessageRole;

const DEFAULT_MODEL: &str = "gpt-4.1-nano-2025-04-14";

/// OpenAI LLM provider.
pub struct OpenAIProvider {
    #[cfg(feature = "openai")]
    client: Client<OpenAIConfig>,
    config: LlmConfig,
}

impl OpenAIProvider {
    /// Create a new OpenAI LLM provider.
    pub fn new(config: LlmConfig) -> SagaResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                SagaError::Configuration("OpenAI API key not found. Set OPENAI_API_KEY environment variable or provide api_key in config.".to_string())
            })?;

        #[cfg(feature = "openai")]
        let client = {
            let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
            if let Some(ref base_url) = config.base_url {
                openai_config = openai_config.with_api_base(base_url);
            }
            Client::with_config(openai_config)
        };
        #[cfg(not(feature = "openai"))]
        let _ = api_key;

        let mut config = config;
        if config.model.is_empty() {
            config.model = DEFAULT_MODEL.to_string();
        }

        Ok(Self {
            #[cfg(feature = "openai")]
            client,
            config,
        })
    }

    /// Reasoning models reject sampling parameters.
    fn is_reasoning_model(&self) -> bool {
        let model_lower = self.config.model.to_lowercase();
        ["o1", "o3", "o4", "gpt-5"]
            .iter()
            .any(|m| model_lower.starts_with(m))
    }

    #[cfg(feature = "openai")]
    fn message_to_openai(msg: &Message) -> ChatCompletionRequestMessage {
        match msg.role {
            MessageRole::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
                    name: msg.name.clone(),
                })
            }
            MessageRole::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
                name: msg.name.clone(),
            }),
            MessageRole::Assistant => {
                let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
                    msg.tool_calls
                        .iter()
                        .map(|call| ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments_value().to_string(),
                            },
                        })
                        .collect()
                });
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content: (!msg.content.is_empty()).then(|| {
                        ChatCompletionRequestAssistantMessageContent::Text(msg.content.clone())
                    }),
                    name: msg.name.clone(),
                    tool_calls,
                    ..Default::default()
                })
            }
            MessageRole::Tool => ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
                content: ChatCompletionRequestToolMessageContent::Text(msg.content.clone()),
                tool_call_id: msg.tool_call_id.clone().unwrap_or_default(),
            }),
        }
    }

    #[cfg(feature = "openai")]
    fn request(&self, messages: &[Message], options: GenerationOptions) -> CreateChatCompletionRequest {
        let mut request = CreateChatCompletionRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(Self::message_to_openai).collect(),
            ..Default::default()
        };
        if !self.is_reasoning_model() {
            request.temperature = Some(options.temperature.unwrap_or(self.config.temperature));
            request.max_tokens = Some(options.max_tokens.unwrap_or(self.config.max_tokens));
        }
        if matches!(options.response_format, Some(ResponseFormat::Json)) {
            request.response_format = Some(async_openai::types::ResponseFormat::JsonObject);
        }
        request
    }

    #[cfg(feature = "openai")]
    async fn complete(&self, request: CreateChatCompletionRequest) -> SagaResult<LlmResponse> {
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| SagaError::llm(format!("OpenAI API error: {}", e)))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SagaError::llm("No response choices returned"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let arguments = match serde_json::from_str(&call.function.arguments) {
                    Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
                    _ => {
                        tracing::warn!(tool = %call.function.name, "Tool call arguments are not a JSON object");
                        Default::default()
                    }
                };
                ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                }
            })
            .collect();

        let usage = response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LlmResponse {
            content: choice.message.content,
            tool_calls,
            usage,
        })
    }
}

#[cfg(feature = "openai")]
fn convert_tool_choice(choice: ToolChoice) -> ChatCompletionToolChoiceOption {
    match choice {
        ToolChoice::Auto => ChatCompletionToolChoiceOption::Auto,
        ToolChoice::None => ChatCompletionToolChoiceOption::None,
        ToolChoice::Required => ChatCompletionToolChoiceOption::Required,
        ToolChoice::Specific(name) => {
            ChatCompletionToolChoiceOption::Named(ChatCompletionNamedToolChoice {
                r#type: ChatCompletionToolType::Function,
                function: FunctionName { name },
            })
        }
    }
}

#[async_trait]
impl Llm for OpenAIProvider {
    #[cfg(feature = "openai")]
    async fn generate(
        &self,
        messages: &[Message],
        options: Option<GenerationOptions>,
    ) -> SagaResult<LlmResponse> {
        let request = self.request(messages, options.unwrap_or_default());
        self.complete(request).await
    }

    #[cfg(not(feature = "openai"))]
    async fn generate(
        &self,
        _messages: &[Message],
        _options: Option<GenerationOptions>,
    ) -> SagaResult<LlmResponse> {
        Err(SagaError::Configuration(
            "OpenAI feature not enabled. Enable the 'openai' feature.".to_string(),
        ))
    }

    #[cfg(feature = "openai")]
    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[Tool],
        tool_choice: ToolChoice,
        options: Option<GenerationOptions>,
    ) -> SagaResult<LlmResponse> {
        let mut request = self.request(messages, options.unwrap_or_default());
        if !tools.is_empty() {
            request.tools = Some(
                tools
                    .iter()
                    .map(|tool| ChatCompletionTool {
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionObject {
                            name: tool.name.clone(),
                            description: Some(tool.description.clone()),
                            parameters: Some(tool.parameters.clone()),
                            strict: None,
                        },
                    })
                    .collect(),
            );
            request.tool_choice = Some(convert_tool_choice(tool_choice));
        }
        self.complete(request).await
    }

    #[cfg(not(feature = "openai"))]
    async fn generate_with_tools(
        &self,
        messages: &[Message],
        _tools: &[Tool],
        _tool_choice: ToolChoice,
        options: Option<GenerationOptions>,
    ) -> SagaResult<LlmResponse> {
        self.generate(messages, options).await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn supports_json_mode(&self) -> bool {
        !self.is_reasoning_model()
    }
}

#[cfg(all(test, feature = "openai"))]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_tool_messages_round_trip_ids() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "recall-memory".to_string(),
            arguments: HashMap::from([("query".to_string(), serde_json::json!("cafe"))]),
        };
        match OpenAIProvider::message_to_openai(&Message::assistant_tool_calls("", vec![call.clone()])) {
            ChatCompletionRequestMessage::Assistant(message) => {
                let calls = message.tool_calls.unwrap();
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[0].function.arguments, r#"{"query":"cafe"}"#);
                assert!(message.content.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
        match OpenAIProvider::message_to_openai(&Message::tool_result(&call, "{}")) {
            ChatCompletionRequestMessage::Tool(message) => assert_eq!(message.tool_call_id, "call_1"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_reasoning_models_skip_sampling() {
        let provider = OpenAIProvider::new(LlmConfig {
            model: "o3-mini".to_string(),
            api_key: Some("test".to_string()),
            ..Default::default()
        })
        .unwrap();
        let request = provider.request(&[Message::user("hi")], GenerationOptions::default());
        assert!(request.temperature.is_none());
        assert!(!provider.supports_json_mode());
    }
}
