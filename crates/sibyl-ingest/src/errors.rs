//! Ingestion pipeline error kinds (component G).

use sibyl_common::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("tenant id missing on an ingestion operation")]
    TenantMissing,

    #[error("invalid chunker configuration: {0}")]
    InvalidChunkerConfig(String),

    #[error("crawl source {0} has no enumerable content")]
    EmptySource(String),

    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("embedding backend error: {0}")]
    Embedding(String),

    #[error("document store error: {0}")]
    Store(String),

    #[error("graph link error: {0}")]
    Graph(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<IngestError> for CoreError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::TenantMissing => CoreError::TenantMissing,
            IngestError::InvalidChunkerConfig(msg) => CoreError::validation("chunker_config", msg),
            IngestError::EmptySource(id) => CoreError::not_found("crawl_source", id, ""),
            IngestError::Fetch { url, reason } => CoreError::upstream("ingest.fetch", format!("{url}: {reason}")),
            IngestError::Embedding(msg) => CoreError::upstream("ingest.embed", msg),
            IngestError::Store(msg) => CoreError::upstream("ingest.store", msg),
            IngestError::Graph(msg) => CoreError::upstream("ingest.graph", msg),
            IngestError::Other(e) => CoreError::Other(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_message_includes_url_and_reason() {
        let err = IngestError::Fetch {
            url: "https://example.com".into(),
            reason: "timed out".into(),
        };
        assert_eq!(err.to_string(), "fetch failed for https://example.com: timed out");
    }
}
