//! Episode ingestion: the single write path into the memory store.

mod pipeline;
mod types;

pub use pipeline::{IngestionPipeline, PipelineOptions};
pub use types::*;
