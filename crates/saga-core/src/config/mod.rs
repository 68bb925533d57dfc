//! Configuration system for saga.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{SagaError, SagaResult};
use crate::traits::{
    DistanceMetric, EmbedderConfig, EmbedderProvider, LlmConfig, VectorStoreConfig,
    VectorStoreProvider,
};
use crate::types::{index_name, CharacterRegistry, MAX_INDEX_NAME_LEN};

/// LLM provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    OpenAI,
}

/// Provider configuration with type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    /// Provider type.
    pub provider: LlmProvider,
    /// Provider-specific configuration.
    #[serde(flatten)]
    pub config: LlmConfig,
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            config: LlmConfig {
                model: "claude-3-5-haiku-20241022".to_string(),
                ..Default::default()
            },
        }
    }
}

/// Embedder provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbedderProviderConfig {
    /// Provider type.
    pub provider: EmbedderProvider,
    /// Provider-specific configuration.
    #[serde(flatten)]
    pub config: EmbedderConfig,
}

/// Ingestion pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Maximum texts per embedding request.
    pub embed_batch_size: usize,
    /// Remove vectors of older versions of an episode after a successful upsert.
    pub supersede_prior_versions: bool,
    /// Replaces the built-in extraction instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_extraction_prompt: Option<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            embed_batch_size: 96,
            supersede_prior_versions: true,
            custom_extraction_prompt: None,
        }
    }
}

/// Retrieval and agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Default result count of the agent's recall tool.
    pub recall_top_k: usize,
    /// Default result count of a direct search.
    pub search_top_k: usize,
    /// Default record count of a debug listing.
    pub list_limit: usize,
    /// Turn store query failures inside the agent loop into "no memories".
    pub degrade_on_query_failure: bool,
    /// Echo the applied filter in recall output.
    pub include_applied_filter: bool,
    /// Upper bound on tool-call rounds per agent turn.
    pub max_tool_rounds: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            recall_top_k: 5,
            search_top_k: 10,
            list_limit: 100,
            degrade_on_query_failure: false,
            include_applied_filter: true,
            max_tool_rounds: 4,
        }
    }
}

/// Main saga configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SagaConfig {
    /// Vector store configuration.
    pub vector_store: VectorStoreConfig,
    /// LLM used for fact extraction.
    pub llm: LlmProviderConfig,
    /// LLM used for character conversations; falls back to `llm`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_llm: Option<LlmProviderConfig>,
    /// Embedder configuration.
    pub embedder: EmbedderProviderConfig,
    /// Ingestion settings.
    pub ingestion: IngestionConfig,
    /// Retrieval settings.
    pub retrieval: RetrievalConfig,
    /// Known characters.
    pub characters: CharacterRegistry,
}

impl SagaConfig {
    /// Default location of the configuration file, `~/.config/saga/config.toml` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("saga").join("config.toml"))
    }

    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> SagaResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        match ext {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| SagaError::Configuration(e.to_string())),
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| SagaError::Configuration(e.to_string())),
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| SagaError::Configuration(e.to_string())),
            _ => Err(SagaError::Configuration(
                "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
            )),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> SagaResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay process environment variables onto this configuration.
    pub fn apply_env(&mut self) -> SagaResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup` onto this configuration.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> SagaResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Vector store
        if let Some(provider) = lookup("SAGA_VECTOR_STORE") {
            self.vector_store.provider = match provider.to_lowercase().as_str() {
                "qdrant" => VectorStoreProvider::Qdrant,
                "sqlite_vec" | "sqlite-vec" | "sqlite" => VectorStoreProvider::SqliteVec,
                "memory" => VectorStoreProvider::Memory,
                other => {
                    return Err(SagaError::UnsupportedProvider {
                        provider: other.to_string(),
                    })
                }
            };
        }
        if let Some(url) = lookup("SAGA_QDRANT_URL").or_else(|| lookup("QDRANT_URL")) {
            self.vector_store.url = Some(url);
        }
        if let Some(key) = lookup("QDRANT_API_KEY") {
            self.vector_store.api_key = Some(key);
        }
        if let Some(path) = lookup("SAGA_SQLITE_PATH") {
            self.vector_store.path = Some(PathBuf::from(path));
        }
        if let Some(index) = lookup("SAGA_INDEX") {
            self.vector_store.default_index = index;
        }
        if let Some(dimension) = lookup("SAGA_EMBEDDING_DIMENSION") {
            let dimension = dimension.parse::<usize>().map_err(|_| {
                SagaError::Configuration(format!(
                    "SAGA_EMBEDDING_DIMENSION must be an integer, got '{}'",
                    dimension
                ))
            })?;
            self.vector_store.dimension = dimension;
            self.embedder.config.embedding_dims = dimension;
        }

        // Extraction LLM
        if let Some(provider) = lookup("SAGA_LLM_PROVIDER") {
            self.llm.provider = parse_llm_provider(&provider)?;
        }
        if let Some(model) = lookup("SAGA_LLM_MODEL") {
            self.llm.config.model = model;
        }

        // Conversation LLM
        if let Some(model) = lookup("SAGA_AGENT_MODEL") {
            let mut agent = self.agent_llm.clone().unwrap_or_else(|| self.llm.clone());
            agent.config.model = model;
            self.agent_llm = Some(agent);
        }

        // Embedder
        if let Some(provider) = lookup("SAGA_EMBEDDER_PROVIDER") {
            self.embedder.provider = match provider.to_lowercase().as_str() {
                "openai" => EmbedderProvider::OpenAI,
                "ollama" => EmbedderProvider::Ollama,
                other => {
                    return Err(SagaError::UnsupportedProvider {
                        provider: other.to_string(),
                    })
                }
            };
        }
        if let Some(model) = lookup("SAGA_EMBEDDER_MODEL") {
            self.embedder.config.model = model;
        }

        // Provider credentials
        if let Some(api_key) = lookup("OPENAI_API_KEY") {
            if self.embedder.provider == EmbedderProvider::OpenAI {
                self.embedder.config.api_key.get_or_insert(api_key.clone());
            }
            for llm in self.llm_configs_mut(LlmProvider::OpenAI) {
                llm.api_key.get_or_insert(api_key.clone());
            }
        }
        if let Some(api_key) = lookup("ANTHROPIC_API_KEY") {
            for llm in self.llm_configs_mut(LlmProvider::Anthropic) {
                llm.api_key.get_or_insert(api_key.clone());
            }
        }

        Ok(())
    }

    fn llm_configs_mut(&mut self, provider: LlmProvider) -> Vec<&mut LlmConfig> {
        let mut configs = Vec::new();
        if self.llm.provider == provider {
            configs.push(&mut self.llm.config);
        }
        if let Some(agent) = self.agent_llm.as_mut() {
            if agent.provider == provider {
                configs.push(&mut agent.config);
            }
        }
        configs
    }

    /// The LLM used for character conversations.
    pub fn agent_llm(&self) -> &LlmProviderConfig {
        self.agent_llm.as_ref().unwrap_or(&self.llm)
    }

    /// Index for `story_id`, or the default index.
    pub fn index_name(&self, story_id: Option<&str>) -> String {
        index_name(&self.vector_store.default_index, story_id)
    }

    /// Check that every external resource identifier needed at startup is present.
    pub fn validate(&self) -> SagaResult<()> {
        let store = &self.vector_store;
        match store.provider {
            VectorStoreProvider::Qdrant if store.url.as_deref().map_or(true, str::is_empty) => {
                return Err(SagaError::Configuration(
                    "vector_store.url is required for the qdrant provider (or set QDRANT_URL)"
                        .to_string(),
                ));
            }
            VectorStoreProvider::SqliteVec if store.path.is_none() => {
                return Err(SagaError::Configuration(
                    "vector_store.path is required for the sqlite_vec provider (or set SAGA_SQLITE_PATH)"
                        .to_string(),
                ));
            }
            _ => {}
        }
        if store.dimension == 0 {
            return Err(SagaError::Configuration(
                "vector_store.dimension must be positive".to_string(),
            ));
        }
        if store.default_index.trim().is_empty() {
            return Err(SagaError::Configuration(
                "vector_store.default_index must not be empty".to_string(),
            ));
        }
        if store.default_index.len() > MAX_INDEX_NAME_LEN
            || !store
                .default_index
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
        {
            return Err(SagaError::Configuration(format!(
                "vector_store.default_index '{}' must be at most {} characters of [a-z0-9-_]",
                store.default_index, MAX_INDEX_NAME_LEN
            )));
        }
        if store.metric != DistanceMetric::Cosine {
            tracing::warn!(metric = ?store.metric, "Scores are only comparable across backends with the cosine metric");
        }
        if self.embedder.config.embedding_dims != store.dimension {
            return Err(SagaError::Configuration(format!(
                "embedder.embedding_dims ({}) does not match vector_store.dimension ({})",
                self.embedder.config.embedding_dims, store.dimension
            )));
        }

        let mut seen = HashSet::new();
        for character in self.characters.iter() {
            if character.id.is_empty() || character.id.contains(':') {
                return Err(SagaError::Configuration(format!(
                    "invalid character id '{}'",
                    character.id
                )));
            }
            if !seen.insert(character.id.as_str()) {
                return Err(SagaError::Configuration(format!(
                    "duplicate character id '{}'",
                    character.id
                )));
            }
        }
        Ok(())
    }
}

fn parse_llm_provider(value: &str) -> SagaResult<LlmProvider> {
    match value.to_lowercase().as_str() {
        "anthropic" => Ok(LlmProvider::Anthropic),
        "openai" => Ok(LlmProvider::OpenAI),
        other => Err(SagaError::UnsupportedProvider {
            provider: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SagaConfig::default();
        assert_eq!(config.vector_store.dimension, 1024);
        assert_eq!(config.vector_store.default_index, "character-memory");
        assert_eq!(config.retrieval.recall_top_k, 5);
        assert_eq!(config.retrieval.search_top_k, 10);
        assert!(config.ingestion.supersede_prior_versions);
        assert_eq!(config.index_name(None), "character-memory");
        assert_eq!(config.index_name(Some("blue-moon")), "character-memory-blue-moon");
    }

    #[test]
    fn test_missing_store_location_fails_fast() {
        let config = SagaConfig::default();
        assert!(matches!(config.validate(), Err(SagaError::Configuration(_))));

        let mut config = SagaConfig::default();
        config.vector_store.provider = VectorStoreProvider::SqliteVec;
        assert!(matches!(config.validate(), Err(SagaError::Configuration(_))));

        let mut config = SagaConfig::default();
        config.vector_store.url = Some("http://localhost:6334".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_index_must_be_plain_ascii() {
        let mut config = SagaConfig::default();
        config.vector_store.provider = VectorStoreProvider::Memory;
        config.vector_store.default_index = format!("a{}", "記".repeat(21));
        assert!(matches!(config.validate(), Err(SagaError::Configuration(_))));

        config.vector_store.default_index = "x".repeat(MAX_INDEX_NAME_LEN + 1);
        assert!(config.validate().is_err());

        config.vector_store.default_index = "saga_memory-2".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_characters_rejected() {
        let mut config = SagaConfig::default();
        config.vector_store.provider = VectorStoreProvider::Memory;
        config.characters = CharacterRegistry::from_ids(["misaki", "misaki"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overlay() {
        let mut config = SagaConfig::default();
        config
            .apply_env_from(env(&[
                ("SAGA_VECTOR_STORE", "sqlite-vec"),
                ("SAGA_SQLITE_PATH", "/tmp/saga.db"),
                ("SAGA_EMBEDDING_DIMENSION", "768"),
                ("SAGA_AGENT_MODEL", "claude-sonnet-4-5"),
                ("ANTHROPIC_API_KEY", "sk-ant"),
                ("OPENAI_API_KEY", "sk-openai"),
            ]))
            .unwrap();

        assert_eq!(config.vector_store.provider, VectorStoreProvider::SqliteVec);
        assert_eq!(config.vector_store.dimension, 768);
        assert_eq!(config.embedder.config.embedding_dims, 768);
        assert_eq!(config.agent_llm().config.model, "claude-sonnet-4-5");
        assert_eq!(config.llm.config.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.agent_llm().config.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.embedder.config.api_key.as_deref(), Some("sk-openai"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_rejects_unknown_provider() {
        let mut config = SagaConfig::default();
        let result = config.apply_env_from(env(&[("SAGA_VECTOR_STORE", "pinecone")]));
        assert!(matches!(result, Err(SagaError::UnsupportedProvider { .. })));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[vector_store]
provider = "qdrant"
url = "http://localhost:6334"

[llm]
provider = "openai"
model = "gpt-4o-mini"

[ingestion]
supersede_prior_versions = false

[[characters]]
id = "misaki"
name = "Misaki"
description = "Nigo's younger sister"
"#
        )
        .unwrap();

        let config = SagaConfig::from_file(file.path()).unwrap();
        assert_eq!(config.llm.provider, LlmProvider::OpenAI);
        assert_eq!(config.llm.config.model, "gpt-4o-mini");
        assert!(!config.ingestion.supersede_prior_versions);
        assert_eq!(config.ingestion.embed_batch_size, 96);
        assert!(config.characters.contains("misaki"));
        assert!(config.validate().is_ok());
    }
}
