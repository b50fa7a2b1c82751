//! Batch embedding of chunk content (§4.7). The concrete LLM/embedding
//! wire protocol is out of scope (§1 Non-goals); callers supply a capability
//! trait object, and the pipeline only owns batching and failure handling.

use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::errors::IngestError;

#[async_trait]
pub trait EmbeddingCapability: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError>;

    fn dimension(&self) -> usize;
}

/// Deterministic, dependency-free embedder for tests: hashes each text
/// into a fixed-dimension vector. Never used outside `#[cfg(test)]`/the
/// `testing` consumers of this crate.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingCapability for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for (i, byte) in text.bytes().enumerate() {
                    vector[i % self.dimension] += byte as f32 / 255.0;
                }
                vector
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embeds chunk texts in fixed-size batches, tolerating partial batch
/// failure: a failed batch leaves those chunks without an embedding rather
/// than aborting the whole document (§4.7 "chunks are still stored without
/// vectors; the event includes an errors count").
pub struct BatchEmbedder {
    capability: std::sync::Arc<dyn EmbeddingCapability>,
    batch_size: usize,
}

impl BatchEmbedder {
    pub fn new(capability: std::sync::Arc<dyn EmbeddingCapability>, batch_size: usize) -> Self {
        Self { capability, batch_size }
    }

    #[instrument(skip(self, texts))]
    pub async fn embed_all(&self, texts: &[String]) -> (Vec<Option<Vec<f32>>>, u32) {
        let mut results = Vec::with_capacity(texts.len());
        let mut errors = 0u32;

        for batch in texts.chunks(self.batch_size.max(1)) {
            match self.capability.embed_batch(batch).await {
                Ok(vectors) => results.extend(vectors.into_iter().map(Some)),
                Err(err) => {
                    warn!(error = %err, batch_len = batch.len(), "embedding batch failed, storing chunks without vectors");
                    errors += batch.len() as u32;
                    results.extend(std::iter::repeat(None).take(batch.len()));
                }
            }
        }
        (results, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embedder_produces_fixed_dimension_vectors() {
        let embedder = MockEmbedder::new(8);
        let vectors = embedder
            .embed_batch(&["hello".to_string(), "world".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == 8));
    }

    #[tokio::test]
    async fn batch_embedder_splits_into_configured_batch_size() {
        let embedder = BatchEmbedder::new(std::sync::Arc::new(MockEmbedder::new(4)), 2);
        let texts: Vec<String> = (0..5).map(|i| format!("text-{i}")).collect();
        let (results, errors) = embedder.embed_all(&texts).await;
        assert_eq!(results.len(), 5);
        assert_eq!(errors, 0);
        assert!(results.iter().all(|r| r.is_some()));
    }
}
