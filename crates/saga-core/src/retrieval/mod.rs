//! Retrieval under the knowledge-isolation filter.

mod engine;
mod filter;

pub use engine::{MemoryQuery, RetrievalEngine, RetrievedMemory, SearchOutcome};
pub use filter::{
    build_filter, cutoff_episode, episode_filter, episode_listing_filter, newer_version_filter,
    superseded_filter, visibility_filter,
};
