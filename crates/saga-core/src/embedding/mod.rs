//! Batch embedding with shape checks.
//!
//! Splits texts into provider-sized chunks, embeds the chunks concurrently and
//! reassembles the vectors in input order. The ingestion pipeline zips facts
//! with vectors positionally, so any count or dimension mismatch fails the
//! whole batch.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

use crate::error::{SagaError, SagaResult};
use crate::traits::{Embedder, EmbeddingAction};

/// Embeds fact texts and recall queries for one configured dimension.
#[derive(Clone)]
pub struct EmbeddingBatcher {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    dimension: usize,
}

impl EmbeddingBatcher {
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize, dimension: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// One vector per text, same order as `texts`.
    pub async fn embed_batch(&self, texts: &[String]) -> SagaResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = texts.chunks(self.batch_size).map(|chunk| async move {
            let vectors = self
                .embedder
                .embed_batch(chunk, Some(EmbeddingAction::Add))
                .await
                .map_err(into_embedding_error)?;
            if vectors.len() != chunk.len() {
                return Err(SagaError::embedding_shape(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    chunk.len()
                )));
            }
            Ok(vectors)
        });

        let vectors: Vec<Vec<f32>> = try_join_all(chunks).await?.into_iter().flatten().collect();
        for (position, vector) in vectors.iter().enumerate() {
            self.check_dimension(vector, position)?;
        }

        debug!(
            count = vectors.len(),
            batches = texts.len().div_ceil(self.batch_size),
            "Embedded batch"
        );
        Ok(vectors)
    }

    /// Embed a recall query.
    pub async fn embed_query(&self, query: &str) -> SagaResult<Vec<f32>> {
        let vector = self
            .embedder
            .embed(query, Some(EmbeddingAction::Search))
            .await
            .map_err(into_embedding_error)?;
        self.check_dimension(&vector, 0)?;
        Ok(vector)
    }

    fn check_dimension(&self, vector: &[f32], position: usize) -> SagaResult<()> {
        if vector.len() != self.dimension {
            return Err(SagaError::embedding_shape(format!(
                "vector {} has dimension {}, expected {}",
                position,
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

fn into_embedding_error(err: SagaError) -> SagaError {
    match err {
        SagaError::Embedding { .. } => err,
        other => SagaError::Embedding {
            message: other.to_string(),
            code: crate::error::ErrorCode::EmbGenerationFailed,
            source: Some(Box::new(other)),
        },
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder: each text maps to a vector derived from its bytes.
    pub struct HashEmbedder {
        pub dimension: usize,
        pub calls: AtomicUsize,
        pub fail_on: Option<String>,
        pub truncate: bool,
    }

    impl HashEmbedder {
        pub fn new(dimension: usize) -> Self {
            Self {
                dimension,
                calls: AtomicUsize::new(0),
                fail_on: None,
                truncate: false,
            }
        }

        pub fn vector_for(text: &str, dimension: usize) -> Vec<f32> {
            let mut vector = vec![0.0f32; dimension];
            for (i, byte) in text.bytes().enumerate() {
                vector[i % dimension] += byte as f32;
            }
            vector
        }
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str, _action: Option<EmbeddingAction>) -> SagaResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.as_deref() == Some(text) {
                return Err(SagaError::embedding("provider unavailable"));
            }
            Ok(Self::vector_for(text, self.dimension))
        }

        async fn embed_batch(
            &self,
            texts: &[String],
            action: Option<EmbeddingAction>,
        ) -> SagaResult<Vec<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text, action).await?);
            }
            if self.truncate {
                out.pop();
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            "hash"
        }
    }
}
