//! Types for episode ingestion.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::error::SagaError;

/// Why an episode is being ingested. Both actions run the same pipeline;
/// the action is carried for logging and for the transport's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IngestAction {
    #[default]
    Create,
    Update,
}

/// One ingestion request, as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(default)]
    pub action: IngestAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    pub episode_id: String,
    pub episode_no: u32,
    #[serde(default = "default_version")]
    pub version: u32,
    pub text: String,
}

fn default_version() -> u32 {
    1
}

impl IngestRequest {
    pub fn new(episode_id: impl Into<String>, episode_no: u32, version: u32, text: impl Into<String>) -> Self {
        Self {
            action: IngestAction::Create,
            story_id: None,
            episode_id: episode_id.into(),
            episode_no,
            version,
            text: text.into(),
        }
    }

    pub fn with_story(mut self, story_id: impl Into<String>) -> Self {
        self.story_id = Some(story_id.into());
        self
    }

    pub fn with_action(mut self, action: IngestAction) -> Self {
        self.action = action;
        self
    }
}

/// Working stages of the pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IngestStage {
    Extracting,
    Embedding,
    Upserting,
}

/// State of one ingestion: `Extracting -> Embedding -> Upserting -> Done`,
/// or `Failed(stage)` from any working stage. An empty extraction goes
/// straight from `Extracting` to `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "stage")]
pub enum IngestState {
    Extracting,
    Embedding,
    Upserting,
    Done,
    Failed(IngestStage),
}

impl From<IngestStage> for IngestState {
    fn from(stage: IngestStage) -> Self {
        match stage {
            IngestStage::Extracting => IngestState::Extracting,
            IngestStage::Embedding => IngestState::Embedding,
            IngestStage::Upserting => IngestState::Upserting,
        }
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestState::Extracting => f.write_str("extracting"),
            IngestState::Embedding => f.write_str("embedding"),
            IngestState::Upserting => f.write_str("upserting"),
            IngestState::Done => f.write_str("done"),
            IngestState::Failed(stage) => write!(f, "failed({})", stage),
        }
    }
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    pub episode_id: String,
    pub episode_no: u32,
    pub version: u32,
    pub index: String,
    pub facts_count: usize,
    pub world_facts_count: usize,
    pub character_facts_count: usize,
    /// Ids written, in fact order.
    pub vector_ids: Vec<String>,
    /// Records removed as superseded, when purging ran and the backend reports counts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded: Option<u64>,
    /// Set when a newer version of the episode is already stored. Nothing from
    /// this request remains in the index and `vector_ids` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<u32>,
    /// States visited, ending in `Done`.
    pub states: Vec<IngestState>,
}

/// A failed ingestion and the stage it failed in.
#[derive(Debug, Error)]
#[error("ingestion of {episode_id} v{version} failed while {stage}: {error}")]
pub struct IngestFailure {
    pub episode_id: String,
    pub version: u32,
    pub stage: IngestStage,
    #[source]
    pub error: SagaError,
}

impl IngestFailure {
    pub fn state(&self) -> IngestState {
        IngestState::Failed(self.stage)
    }

    /// Whether the transport may redeliver the request.
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}
