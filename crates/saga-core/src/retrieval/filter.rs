//! The knowledge-isolation filter.
//!
//! A character speaking during episode `N` may see a fact only if
//!
//! ```text
//! episodeNo <= N - 1
//! AND (scope == world OR (scope == character AND characterId == active))
//! ```
//!
//! Facts from episode `N` itself are what the character is living through
//! right now, so they are not yet remembered.

use serde_json::Value;

use crate::types::{fields, Filter, MemoryScope};

/// Last episode whose facts a character in `current_episode_no` may remember.
///
/// `None` when no episode precedes the current one.
pub fn cutoff_episode(current_episode_no: u32) -> Option<u32> {
    current_episode_no.checked_sub(1).filter(|cutoff| *cutoff >= 1)
}

/// Visibility clause: world facts, plus the character's own private facts.
pub fn visibility_filter(character_id: &str) -> Filter {
    Filter::or(vec![
        Filter::eq(fields::SCOPE, MemoryScope::World.as_str()),
        Filter::and(vec![
            Filter::eq(fields::SCOPE, MemoryScope::Character.as_str()),
            Filter::eq(fields::CHARACTER_ID, character_id),
        ]),
    ])
}

/// Build the recall filter for `character_id` speaking in `current_episode_no`.
///
/// Returns `None` when the cutoff is below the first episode; callers must
/// then return no memories without querying the store.
pub fn build_filter(character_id: &str, current_episode_no: u32) -> Option<Filter> {
    let cutoff = cutoff_episode(current_episode_no)?;
    Some(Filter::and(vec![
        Filter::lte(fields::EPISODE_NO, cutoff),
        visibility_filter(character_id),
    ]))
}

/// Facts of exactly `episode_no`, optionally restricted to what
/// `character_id` may see.
pub fn episode_listing_filter(episode_no: u32, character_id: Option<&str>) -> Filter {
    let mut clauses = vec![Filter::eq(fields::EPISODE_NO, episode_no)];
    if let Some(id) = character_id {
        clauses.push(visibility_filter(id));
    }
    Filter::and(clauses)
}

/// Records of `episode_id` made stale by a successful write of `version`:
/// every older version, plus ids of the same version not in `current_ids`.
pub fn superseded_filter(episode_id: &str, version: u32, current_ids: &[String]) -> Filter {
    Filter::and(vec![
        Filter::eq(fields::EPISODE_ID, episode_id),
        Filter::or(vec![
            Filter::lt(fields::VERSION, version),
            Filter::and(vec![
                Filter::eq(fields::VERSION, version),
                Filter::not_in(
                    fields::VECTOR_ID,
                    current_ids.iter().cloned().map(Value::from).collect(),
                ),
            ]),
        ]),
    ])
}

/// Records of `episode_id` written by a version later than `version`.
pub fn newer_version_filter(episode_id: &str, version: u32) -> Filter {
    Filter::and(vec![
        Filter::eq(fields::EPISODE_ID, episode_id),
        Filter::gt(fields::VERSION, version),
    ])
}

/// Records of `episode_id`, optionally only those of one `version`.
pub fn episode_filter(episode_id: &str, version: Option<u32>) -> Filter {
    match version {
        Some(version) => Filter::and(vec![
            Filter::eq(fields::EPISODE_ID, episode_id),
            Filter::eq(fields::VERSION, version),
        ]),
        None => Filter::eq(fields::EPISODE_ID, episode_id),
    }
}
