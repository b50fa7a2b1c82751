//! Query embedding capability for the retrieval engine. Kept distinct from
//! `sibyl-ingest`'s `EmbeddingCapability` so this crate doesn't pull in the
//! ingestion pipeline just to embed a search query; the shape mirrors it.

use async_trait::async_trait;

use crate::errors::RetrievalError;

#[async_trait]
pub trait QueryEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    fn dimension(&self) -> usize;
}

/// Deterministic, dependency-free embedder for tests.
pub struct MockQueryEmbedder {
    dimension: usize,
}

impl MockQueryEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl QueryEmbedder for MockQueryEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut vector = vec![0.0f32; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dimension] += byte as f32 / 255.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embedder_is_deterministic() {
        let embedder = MockQueryEmbedder::new(16);
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }
}
