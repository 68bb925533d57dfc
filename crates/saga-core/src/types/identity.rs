//! Deterministic vector identities.
//!
//! A record's id is derived from `(episodeId, version, scope, owner, factIndex)`
//! as `vec:{episodeId}:v{version}:{scope}:{characterId-or-"world"}:{factIndex}`.
//! The same inputs always yield the same id, which is what makes re-ingesting
//! an episode overwrite in place instead of duplicating. The format is the
//! store's only deduplication key and must stay stable.

use std::fmt;
use std::str::FromStr;

use super::fact::{MemoryScope, WORLD_SENTINEL};
use crate::error::{SagaError, SagaResult};

const PREFIX: &str = "vec";
const SEPARATOR: char = ':';

/// Parsed form of a vector id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VectorId {
    pub episode_id: String,
    pub version: u32,
    pub scope: MemoryScope,
    /// `None` for world facts.
    pub character_id: Option<String>,
    pub fact_index: u32,
}

impl VectorId {
    /// Build an id, rejecting segments that would make the string ambiguous.
    pub fn new(
        episode_id: &str,
        version: u32,
        scope: MemoryScope,
        character_id: Option<&str>,
        fact_index: u32,
    ) -> SagaResult<Self> {
        check_segment("episodeId", episode_id)?;
        let character_id = match scope {
            MemoryScope::World => None,
            MemoryScope::Character => {
                let id = character_id.ok_or_else(|| {
                    SagaError::invalid_fact("character-scoped fact requires a characterId")
                })?;
                check_segment("characterId", id)?;
                Some(id.to_string())
            }
        };
        Ok(Self {
            episode_id: episode_id.to_string(),
            version,
            scope,
            character_id,
            fact_index,
        })
    }

    fn owner_token(&self) -> &str {
        self.character_id.as_deref().unwrap_or(WORLD_SENTINEL)
    }
}

fn check_segment(field: &str, value: &str) -> SagaResult<()> {
    if value.is_empty() || value.contains(SEPARATOR) {
        return Err(SagaError::invalid_identifier(field, value));
    }
    Ok(())
}

impl fmt::Display for VectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PREFIX}:{}:v{}:{}:{}:{}",
            self.episode_id,
            self.version,
            self.scope,
            self.owner_token(),
            self.fact_index
        )
    }
}

impl FromStr for VectorId {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SagaError::invalid_identifier("vectorId", s);

        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        let [prefix, episode_id, version, scope, owner, index] = parts.as_slice() else {
            return Err(invalid());
        };
        if *prefix != PREFIX {
            return Err(invalid());
        }
        let version = version
            .strip_prefix('v')
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        let scope = MemoryScope::from_str(scope).map_err(|_| invalid())?;
        let fact_index = index.parse::<u32>().map_err(|_| invalid())?;

        match scope {
            MemoryScope::World if *owner != WORLD_SENTINEL => Err(invalid()),
            _ => Self::new(episode_id, version, scope, Some(owner), fact_index),
        }
    }
}

/// Derive the vector id string for one fact position.
///
/// `character_id` is ignored for world-scoped facts.
pub fn derive_vector_id(
    episode_id: &str,
    version: u32,
    scope: MemoryScope,
    character_id: Option<&str>,
    fact_index: u32,
) -> SagaResult<String> {
    VectorId::new(episode_id, version, scope, character_id, fact_index).map(|id| id.to_string())
}

/// Longest index name produced by [`index_name`].
pub const MAX_INDEX_NAME_LEN: usize = 63;

/// Name of the index holding a story's memories.
///
/// Without a story (or with one that sanitizes to nothing) this is `default`.
/// Otherwise it is `{default}-{story}` with the story lowercased and every run
/// of characters outside `[a-z0-9]` collapsed to a single `-`.
pub fn index_name(default: &str, story_id: Option<&str>) -> String {
    let Some(story) = story_id else {
        return default.to_string();
    };

    let mut slug = String::with_capacity(story.len());
    for ch in story.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        return default.to_string();
    }

    let mut name = format!("{}-{}", default, slug);
    if name.len() > MAX_INDEX_NAME_LEN {
        let mut end = MAX_INDEX_NAME_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name.trim_end_matches('-').to_string()
}
