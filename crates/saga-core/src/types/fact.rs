//! Facts, episode deltas and the persisted record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use strum::{Display, EnumString, IntoStaticStr};

use super::character::CharacterRegistry;
use super::identity::VectorId;
use crate::error::{SagaError, SagaResult};

/// Token stored in the `characterId` field (and the vector id) of world facts.
pub const WORLD_SENTINEL: &str = "world";

/// Lowest accepted importance.
pub const MIN_IMPORTANCE: u8 = 1;
/// Highest accepted importance.
pub const MAX_IMPORTANCE: u8 = 5;

/// Payload field names. Filters reference records by these names, so they
/// are part of the persisted contract.
pub mod fields {
    pub const VECTOR_ID: &str = "vectorId";
    pub const EPISODE_ID: &str = "episodeId";
    pub const EPISODE_NO: &str = "episodeNo";
    pub const VERSION: &str = "version";
    pub const SCOPE: &str = "scope";
    pub const CHARACTER_ID: &str = "characterId";
    pub const FACT_INDEX: &str = "factIndex";
    pub const TEXT: &str = "text";
    pub const IMPORTANCE: &str = "importance";
}

/// Visibility class of a fact.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MemoryScope {
    /// Visible to every character.
    World,
    /// Visible only to the owning character.
    Character,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// One extracted statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryFact {
    pub text: String,
    pub scope: MemoryScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    pub importance: u8,
}

impl MemoryFact {
    /// A world-visible fact.
    pub fn world(text: impl Into<String>, importance: u8) -> Self {
        Self {
            text: text.into(),
            scope: MemoryScope::World,
            character_id: None,
            importance,
        }
    }

    /// A fact private to `character_id`.
    pub fn character(character_id: impl Into<String>, text: impl Into<String>, importance: u8) -> Self {
        Self {
            text: text.into(),
            scope: MemoryScope::Character,
            character_id: Some(character_id.into()),
            importance,
        }
    }

    /// The owner segment used in vector ids and the `characterId` payload field.
    ///
    /// World facts always map to [`WORLD_SENTINEL`], whatever `character_id` holds.
    pub fn owner_token(&self) -> &str {
        match self.scope {
            MemoryScope::World => WORLD_SENTINEL,
            MemoryScope::Character => self.character_id.as_deref().unwrap_or(WORLD_SENTINEL),
        }
    }

    /// Structural validation: non-empty text, importance in range, and a
    /// character id present exactly when the scope requires one.
    pub fn validate(&self) -> SagaResult<()> {
        if self.text.trim().is_empty() {
            return Err(SagaError::invalid_fact("fact text must not be empty"));
        }
        if !(MIN_IMPORTANCE..=MAX_IMPORTANCE).contains(&self.importance) {
            return Err(SagaError::invalid_fact(format!(
                "importance {} is outside {}..={}",
                self.importance, MIN_IMPORTANCE, MAX_IMPORTANCE
            )));
        }
        if self.scope == MemoryScope::Character {
            match self.character_id.as_deref() {
                Some(id) if !id.is_empty() => {}
                _ => {
                    return Err(SagaError::invalid_fact(
                        "character-scoped fact requires a characterId",
                    ))
                }
            }
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus membership of the owner in the registry.
    pub fn validate_with(&self, registry: &CharacterRegistry) -> SagaResult<()> {
        self.validate()?;
        if let (MemoryScope::Character, Some(id)) = (self.scope, self.character_id.as_deref()) {
            if !registry.contains(id) {
                return Err(SagaError::invalid_fact(format!("unknown character '{}'", id)));
            }
        }
        Ok(())
    }
}

/// The facts attributable to one version of one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeDelta {
    pub episode_id: String,
    pub episode_no: u32,
    pub version: u32,
    /// Order defines each fact's `factIndex`.
    pub facts: Vec<MemoryFact>,
    pub extracted_at: DateTime<Utc>,
}

impl EpisodeDelta {
    pub fn new(
        episode_id: impl Into<String>,
        episode_no: u32,
        version: u32,
        facts: Vec<MemoryFact>,
    ) -> Self {
        Self {
            episode_id: episode_id.into(),
            episode_no,
            version,
            facts,
            extracted_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn world_fact_count(&self) -> usize {
        self.facts.iter().filter(|f| f.scope == MemoryScope::World).count()
    }

    pub fn character_fact_count(&self) -> usize {
        self.facts
            .iter()
            .filter(|f| f.scope == MemoryScope::Character)
            .count()
    }

    /// Build the metadata of every fact, in fact order.
    pub fn metadata(&self) -> SagaResult<Vec<MemoryVectorMetadata>> {
        self.facts
            .iter()
            .enumerate()
            .map(|(index, fact)| MemoryVectorMetadata::for_fact(self, fact, index as u32))
            .collect()
    }
}

/// Metadata persisted next to each embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryVectorMetadata {
    pub vector_id: String,
    pub episode_id: String,
    pub episode_no: u32,
    pub version: u32,
    pub scope: MemoryScope,
    /// Owner id, or [`WORLD_SENTINEL`] for world facts.
    pub character_id: String,
    pub fact_index: u32,
    pub text: String,
    pub importance: u8,
}

impl MemoryVectorMetadata {
    /// Metadata for the fact at `fact_index` of `delta`.
    pub fn for_fact(delta: &EpisodeDelta, fact: &MemoryFact, fact_index: u32) -> SagaResult<Self> {
        fact.validate()?;
        let id = VectorId::new(
            &delta.episode_id,
            delta.version,
            fact.scope,
            fact.character_id.as_deref(),
            fact_index,
        )?;
        Ok(Self {
            vector_id: id.to_string(),
            episode_id: delta.episode_id.clone(),
            episode_no: delta.episode_no,
            version: delta.version,
            scope: fact.scope,
            character_id: fact.owner_token().to_string(),
            fact_index,
            text: fact.text.clone(),
            importance: fact.importance,
        })
    }

    /// Flatten into the payload map handed to the vector store.
    pub fn to_payload(&self) -> HashMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => HashMap::new(),
        }
    }

    /// Rebuild from a payload returned by the vector store.
    pub fn from_payload(payload: &HashMap<String, Value>) -> SagaResult<Self> {
        let object: serde_json::Map<String, Value> =
            payload.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        serde_json::from_value(Value::Object(object))
            .map_err(|e| SagaError::parse(format!("Malformed record payload: {}", e)))
    }

    /// The owning character, `None` for world facts.
    pub fn owner(&self) -> Option<&str> {
        match self.scope {
            MemoryScope::World => None,
            MemoryScope::Character => Some(&self.character_id),
        }
    }
}

/// An embedding together with its metadata: the persisted unit.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryVectorRecord {
    pub metadata: MemoryVectorMetadata,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_validation() {
        assert!(MemoryFact::world("The cafe opens at nine", 3).validate().is_ok());
        assert!(MemoryFact::world("", 3).validate().is_err());
        assert!(MemoryFact::world("x", 0).validate().is_err());
        assert!(MemoryFact::world("x", 6).validate().is_err());

        let orphan = MemoryFact {
            text: "secret".to_string(),
            scope: MemoryScope::Character,
            character_id: None,
            importance: 4,
        };
        assert!(orphan.validate().is_err());
    }

    #[test]
    fn test_world_fact_ignores_character_id() {
        let fact = MemoryFact {
            text: "Public news".to_string(),
            scope: MemoryScope::World,
            character_id: Some("misaki".to_string()),
            importance: 2,
        };
        assert_eq!(fact.owner_token(), WORLD_SENTINEL);
    }

    #[test]
    fn test_delta_counts_and_metadata() {
        let delta = EpisodeDelta::new(
            "episode-1",
            1,
            1,
            vec![
                MemoryFact::world("X is the cafe owner", 3),
                MemoryFact::character("misaki", "Misaki hid the letter", 4),
            ],
        );
        assert_eq!(delta.world_fact_count(), 1);
        assert_eq!(delta.character_fact_count(), 1);

        let metadata = delta.metadata().unwrap();
        assert_eq!(metadata[0].vector_id, "vec:episode-1:v1:world:world:0");
        assert_eq!(metadata[0].character_id, WORLD_SENTINEL);
        assert_eq!(metadata[1].vector_id, "vec:episode-1:v1:character:misaki:1");
        assert_eq!(metadata[1].owner(), Some("misaki"));
    }

    #[test]
    fn test_payload_field_names() {
        let delta = EpisodeDelta::new("episode-2", 2, 3, vec![MemoryFact::world("Rain", 1)]);
        let metadata = delta.metadata().unwrap().remove(0);
        let payload = metadata.to_payload();

        for key in [
            fields::VECTOR_ID,
            fields::EPISODE_ID,
            fields::EPISODE_NO,
            fields::VERSION,
            fields::SCOPE,
            fields::CHARACTER_ID,
            fields::FACT_INDEX,
            fields::TEXT,
            fields::IMPORTANCE,
        ] {
            assert!(payload.contains_key(key), "missing {key}");
        }
        assert_eq!(payload[fields::SCOPE], Value::from("world"));
        assert_eq!(payload[fields::EPISODE_NO], Value::from(2));

        let restored = MemoryVectorMetadata::from_payload(&payload).unwrap();
        assert_eq!(restored, metadata);
    }

    #[test]
    fn test_registry_membership() {
        let registry = CharacterRegistry::from_ids(["himuro-nigo", "misaki"]);
        assert!(MemoryFact::character("misaki", "x", 1).validate_with(&registry).is_ok());
        assert!(MemoryFact::character("nobody", "x", 1)
            .validate_with(&registry)
            .is_err());
    }
}
