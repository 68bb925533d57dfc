//! Error types for saga operations.
//!
//! Every failure surfaced by the ingestion pipeline or the retrieval engine
//! is one of the variants below, each carrying a stable [`ErrorCode`] so the
//! transport layer can decide between retrying and dead-lettering without
//! parsing messages.

use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for saga operations.
pub type SagaResult<T> = Result<T, SagaError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for all saga operations.
#[derive(Error, Debug)]
pub enum SagaError {
    /// The extraction service errored or returned structurally invalid output.
    #[error("Extraction failed: {message}")]
    Extraction {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<BoxedSource>,
    },

    /// The embedding service errored or returned mismatched output.
    #[error("Embedding error: {message}")]
    Embedding {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<BoxedSource>,
    },

    /// An upsert or delete against the vector store failed.
    ///
    /// `partial` is set when some records of the batch were already written
    /// before the failure. Retrying the whole batch is always safe because
    /// records are keyed by deterministic ids.
    #[error("Store write failed ({written} written, partial: {partial}): {message}")]
    StoreWrite {
        message: String,
        code: ErrorCode,
        partial: bool,
        written: usize,
        #[source]
        source: Option<BoxedSource>,
    },

    /// A similarity query or listing against the vector store failed.
    #[error("Store query failed: {message}")]
    StoreQuery {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Vector store connection or index management failed.
    #[error("Vector store error: {message}")]
    VectorStore {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<BoxedSource>,
    },

    /// LLM operation failed.
    #[error("LLM error: {message}")]
    Llm {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        details: HashMap<String, String>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Provider not supported.
    #[error("Provider not supported: {provider}")]
    UnsupportedProvider { provider: String },

    /// Parse error.
    #[error("Parse error: {message}")]
    Parse { message: String, code: ErrorCode },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation (VAL_xxx)
    ValInvalidInput,
    ValInvalidFact,
    ValInvalidIdentifier,

    // Extraction (EXT_xxx)
    ExtServiceFailed,
    ExtInvalidStructure,
    ExtUnknownCharacter,

    // Embedding (EMB_xxx)
    EmbConnectionFailed,
    EmbGenerationFailed,
    EmbShapeMismatch,

    // Vector Store (VEC_xxx)
    VecConnectionFailed,
    VecWriteFailed,
    VecPartialWrite,
    VecQueryFailed,
    VecIndexNotFound,

    // LLM (LLM_xxx)
    LlmConnectionFailed,
    LlmGenerationFailed,
    LlmInvalidResponse,

    // Parse (PARSE_xxx)
    ParseInvalidJson,
    ParseMissingField,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValInvalidFact => "VAL_002",
            ErrorCode::ValInvalidIdentifier => "VAL_003",
            ErrorCode::ExtServiceFailed => "EXT_001",
            ErrorCode::ExtInvalidStructure => "EXT_002",
            ErrorCode::ExtUnknownCharacter => "EXT_003",
            ErrorCode::EmbConnectionFailed => "EMB_001",
            ErrorCode::EmbGenerationFailed => "EMB_002",
            ErrorCode::EmbShapeMismatch => "EMB_003",
            ErrorCode::VecConnectionFailed => "VEC_001",
            ErrorCode::VecWriteFailed => "VEC_002",
            ErrorCode::VecPartialWrite => "VEC_003",
            ErrorCode::VecQueryFailed => "VEC_004",
            ErrorCode::VecIndexNotFound => "VEC_005",
            ErrorCode::LlmConnectionFailed => "LLM_001",
            ErrorCode::LlmGenerationFailed => "LLM_002",
            ErrorCode::LlmInvalidResponse => "LLM_003",
            ErrorCode::ParseInvalidJson => "PARSE_001",
            ErrorCode::ParseMissingField => "PARSE_002",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl SagaError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            details: HashMap::new(),
        }
    }

    /// Create a validation error for a malformed fact.
    pub fn invalid_fact(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidFact,
            details: HashMap::new(),
        }
    }

    /// Create a validation error for an identifier that cannot be used in a vector id.
    pub fn invalid_identifier(field: &str, value: &str) -> Self {
        let mut details = HashMap::new();
        details.insert("field".to_string(), field.to_string());
        details.insert("value".to_string(), value.to_string());
        Self::Validation {
            message: format!("'{}' is not a valid {}", value, field),
            code: ErrorCode::ValInvalidIdentifier,
            details,
        }
    }

    /// Create an extraction error.
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
            code: ErrorCode::ExtInvalidStructure,
            source: None,
        }
    }

    /// Wrap a failure of the underlying extraction service.
    pub fn extraction_service(err: SagaError) -> Self {
        Self::Extraction {
            message: err.to_string(),
            code: ErrorCode::ExtServiceFailed,
            source: Some(Box::new(err)),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            code: ErrorCode::EmbGenerationFailed,
            source: None,
        }
    }

    /// Create an embedding error for a result with the wrong count or dimension.
    pub fn embedding_shape(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            code: ErrorCode::EmbShapeMismatch,
            source: None,
        }
    }

    /// Create a full store write failure (nothing from the batch was written).
    pub fn store_write(message: impl Into<String>) -> Self {
        Self::StoreWrite {
            message: message.into(),
            code: ErrorCode::VecWriteFailed,
            partial: false,
            written: 0,
            source: None,
        }
    }

    /// Create a partial store write failure.
    pub fn partial_store_write(message: impl Into<String>, written: usize) -> Self {
        Self::StoreWrite {
            message: message.into(),
            code: ErrorCode::VecPartialWrite,
            partial: true,
            written,
            source: None,
        }
    }

    /// Create a store query failure.
    pub fn store_query(message: impl Into<String>) -> Self {
        Self::StoreQuery {
            message: message.into(),
            code: ErrorCode::VecQueryFailed,
            source: None,
        }
    }

    /// Create a vector store error.
    pub fn vector_store(message: impl Into<String>) -> Self {
        Self::VectorStore {
            message: message.into(),
            code: ErrorCode::VecConnectionFailed,
            source: None,
        }
    }

    /// Create an index-not-found error.
    pub fn index_not_found(index: &str) -> Self {
        Self::VectorStore {
            message: format!("Index '{}' does not exist", index),
            code: ErrorCode::VecIndexNotFound,
            source: None,
        }
    }

    /// Create an LLM error.
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
            code: ErrorCode::LlmGenerationFailed,
            source: None,
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            code: ErrorCode::ParseInvalidJson,
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Extraction { code, .. } => *code,
            Self::Embedding { code, .. } => *code,
            Self::StoreWrite { code, .. } => *code,
            Self::StoreQuery { code, .. } => *code,
            Self::VectorStore { code, .. } => *code,
            Self::Llm { code, .. } => *code,
            Self::Validation { code, .. } => *code,
            Self::Parse { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether the transport may redeliver the message that caused this error.
    ///
    /// Writes are idempotent by vector id, so store and service failures are
    /// retryable. Configuration and validation failures will fail again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreWrite { .. }
            | Self::StoreQuery { .. }
            | Self::VectorStore { .. }
            | Self::Embedding { .. }
            | Self::Llm { .. }
            | Self::Io(_) => true,
            Self::Extraction { code, .. } => *code == ErrorCode::ExtServiceFailed,
            _ => false,
        }
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::StoreWrite { .. } => Some("Retry the ingestion; writes are idempotent by vector id"),
            Self::VectorStore { .. } => Some("Please check your vector store connection settings"),
            Self::Llm { .. } => Some("Please check your LLM provider configuration"),
            Self::Embedding { .. } => Some("Please check your embedding provider configuration"),
            Self::Configuration(_) => Some("Please check the configuration file and SAGA_* environment variables"),
            _ => None,
        }
    }
}
