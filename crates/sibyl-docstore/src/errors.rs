//! Document-store error kinds (component B).

use sibyl_common::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocStoreError {
    #[error("tenant id missing on a document-store operation")]
    TenantMissing,

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("source {source_id} already has a document at {url}")]
    DuplicateDocument { source_id: String, url: String },

    #[error("database pool error: {0}")]
    Pool(String),

    #[error("database query failed: {0}")]
    Query(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<DocStoreError> for CoreError {
    fn from(err: DocStoreError) -> Self {
        match err {
            DocStoreError::TenantMissing => CoreError::TenantMissing,
            DocStoreError::NotFound { kind, id } => CoreError::NotFound {
                kind,
                id,
                tenant_id: String::new(),
            },
            DocStoreError::DuplicateDocument { source_id, url } => {
                CoreError::Conflict(format!("document {url} already crawled for source {source_id}"))
            }
            DocStoreError::Pool(msg) | DocStoreError::Query(msg) | DocStoreError::Migration(msg) => {
                CoreError::upstream("docstore", msg)
            }
            DocStoreError::Other(e) => CoreError::Other(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_document_maps_to_conflict() {
        let core: CoreError = DocStoreError::DuplicateDocument {
            source_id: "src_1".into(),
            url: "https://example.com".into(),
        }
        .into();
        assert!(matches!(core, CoreError::Conflict(_)));
    }

    #[test]
    fn not_found_preserves_kind_and_id() {
        let core: CoreError = DocStoreError::NotFound {
            kind: "document",
            id: "doc_1".into(),
        }
        .into();
        match core {
            CoreError::NotFound { kind, id, .. } => {
                assert_eq!(kind, "document");
                assert_eq!(id, "doc_1");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
