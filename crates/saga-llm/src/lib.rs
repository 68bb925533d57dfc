//! saga-llm - LLM provider implementations for saga.
//!
//! Two roles use an LLM: fact extraction (JSON output, temperature 0) and
//! the character conversation loop (tool calling).
//!
//! # Supported Providers
//!
//! - **Anthropic** - Claude models over the Messages API
//! - **OpenAI** (feature: `openai`) - GPT models, and OpenAI-compatible servers via `base_url`
//!
//! # Example
//!
//! ```ignore
//! use saga_llm::LlmFactory;
//!
//! let llm = LlmFactory::anthropic_with_model("claude-3-5-haiku-20241022")?;
//! let agent_llm = LlmFactory::from_config(config.agent_llm())?;
//! ```

mod anthropic;
mod factory;
mod openai;

pub use anthropic::AnthropicLlm;
pub use factory::LlmFactory;
pub use openai::OpenAIProvider;

// Re-export core types for convenience
pub use saga_core::config::LlmProvider;
pub use saga_core::traits::{GenerationOptions, Llm, LlmConfig, LlmResponse, ResponseFormat};
