//! Graph adapter error kinds (§4.1).

use sibyl_common::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("not connected to graph backend")]
    NotConnected,

    #[error("operation '{operation}' exceeded its deadline")]
    Timeout { operation: String },

    #[error("tenant id missing on a graph operation")]
    TenantMissing,

    #[error("graph query failed: {0}")]
    QueryFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<GraphError> for CoreError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::TenantMissing => CoreError::TenantMissing,
            GraphError::Timeout { operation } => CoreError::Timeout {
                operation,
                budget_ms: 0,
            },
            GraphError::NotConnected => CoreError::upstream("graph", "not connected"),
            GraphError::QueryFailed(msg) => CoreError::upstream("graph", msg),
            GraphError::Other(e) => CoreError::Other(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_missing_maps_to_core_tenant_missing() {
        let core: CoreError = GraphError::TenantMissing.into();
        assert!(matches!(core, CoreError::TenantMissing));
    }

    #[test]
    fn query_failed_maps_to_upstream_unavailable() {
        let core: CoreError = GraphError::QueryFailed("connection reset".into()).into();
        assert!(matches!(core, CoreError::UpstreamUnavailable { .. }));
    }
}
