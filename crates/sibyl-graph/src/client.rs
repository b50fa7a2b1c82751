//! FalkorDB-backed graph client (§4.1, component A).
//!
//! Each organization owns its own graph, addressed by `organization_id` as
//! the `GRAPH.QUERY`/`GRAPH.RO_QUERY` graph-name argument — the Rust
//! equivalent of the source client's `get_org_driver` graph cloning. All
//! writes funnel through a bounded semaphore to keep FalkorDB's single
//! connection from being hammered by concurrent mutations.

use std::sync::Arc;

use redis::aio::ConnectionManager;
use serde_json::Value as JsonValue;
use sibyl_common::backoff::{retry_with_backoff, BackoffConfig};
use sibyl_common::config::Timeouts;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};

use crate::errors::GraphError;
use crate::value::{bind_params, normalize_result, GraphRow};

/// Vector similarity index dimension is fixed per deployment; indexes are
/// created once per organization and are safe to re-run.
const COMPOSITE_INDEXES: &[&str] = &[
    "CREATE INDEX FOR (n:Entity) ON (n.project_id, n.status)",
    "CREATE INDEX FOR (n:Entity) ON (n.entity_type)",
    "CREATE INDEX FOR (n:Episodic) ON (n.entity_type)",
];

pub struct GraphClient {
    conn: ConnectionManager,
    write_semaphore: Arc<Semaphore>,
    timeouts: Timeouts,
    backoff: BackoffConfig,
    embedding_dimension: usize,
}

impl GraphClient {
    #[instrument(skip(redis_url))]
    pub async fn connect(
        redis_url: &str,
        write_semaphore_width: usize,
        embedding_dimension: usize,
        timeouts: Timeouts,
    ) -> Result<Self, GraphError> {
        info!(write_semaphore_width, "connecting to FalkorDB");
        let client = redis::Client::open(redis_url)
            .map_err(|e| GraphError::QueryFailed(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| GraphError::QueryFailed(e.to_string()))?;
        Ok(Self {
            conn,
            write_semaphore: Arc::new(Semaphore::new(write_semaphore_width.max(1))),
            timeouts,
            backoff: BackoffConfig::default(),
            embedding_dimension,
        })
    }

    /// Idempotent index bootstrap for a tenant's graph: a cosine vector
    /// index on `Entity.name_embedding` plus the composite lookup indexes
    /// every query path relies on.
    #[instrument(skip(self))]
    pub async fn ensure_indexes(&self, organization_id: &str) -> Result<(), GraphError> {
        require_tenant(organization_id)?;

        let vector_index = format!(
            "CREATE VECTOR INDEX FOR (n:Entity) ON (n.name_embedding) \
             OPTIONS {{dimension: {}, similarityFunction: 'cosine'}}",
            self.embedding_dimension
        );
        if let Err(err) = self.raw_write(organization_id, &vector_index).await {
            if !already_exists(&err) {
                return Err(err);
            }
        }

        for idx_query in COMPOSITE_INDEXES {
            if let Err(err) = self.raw_write(organization_id, idx_query).await {
                if !already_exists(&err) {
                    return Err(err);
                }
            }
        }
        info!(organization_id, "ensured graph indexes");
        Ok(())
    }

    /// Tenant-scoped read query, executed against `GRAPH.RO_QUERY`.
    #[instrument(skip(self, params))]
    pub async fn execute_read(
        &self,
        organization_id: &str,
        columns: &[&str],
        query: &str,
        params: &[(&str, JsonValue)],
    ) -> Result<Vec<GraphRow>, GraphError> {
        require_tenant(organization_id)?;
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let organization_id = organization_id.to_string();
        let query = bind_params(query, params);

        let timeout = self.timeouts.graph_query();
        let backoff = self.backoff;
        retry_with_backoff(
            backoff,
            || {
                let mut conn = self.conn.clone();
                let organization_id = organization_id.clone();
                let query = query.clone();
                let columns = columns.clone();
                async move {
                    tokio::time::timeout(timeout, run_query(&mut conn, &organization_id, &query, false))
                        .await
                        .map_err(|_| GraphError::Timeout {
                            operation: "graph_query".into(),
                        })?
                        .map(|raw| normalize_result(&columns, raw))
                }
            },
            is_retryable,
        )
        .await
    }

    /// Tenant-scoped write query, serialized by the process-wide semaphore
    /// to prevent connection contention on FalkorDB's single socket.
    #[instrument(skip(self, params))]
    pub async fn execute_write(
        &self,
        organization_id: &str,
        columns: &[&str],
        query: &str,
        params: &[(&str, JsonValue)],
    ) -> Result<Vec<GraphRow>, GraphError> {
        require_tenant(organization_id)?;
        let _permit = self
            .write_semaphore
            .acquire()
            .await
            .map_err(|_| GraphError::NotConnected)?;

        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let organization_id = organization_id.to_string();
        let query = bind_params(query, params);
        let timeout = self.timeouts.graph_query();
        let backoff = self.backoff;

        retry_with_backoff(
            backoff,
            || {
                let mut conn = self.conn.clone();
                let organization_id = organization_id.clone();
                let query = query.clone();
                let columns = columns.clone();
                async move {
                    tokio::time::timeout(timeout, run_query(&mut conn, &organization_id, &query, true))
                        .await
                        .map_err(|_| GraphError::Timeout {
                            operation: "graph_query".into(),
                        })?
                        .map(|raw| normalize_result(&columns, raw))
                }
            },
            is_retryable,
        )
        .await
    }

    async fn raw_write(&self, organization_id: &str, query: &str) -> Result<(), GraphError> {
        let _permit = self
            .write_semaphore
            .acquire()
            .await
            .map_err(|_| GraphError::NotConnected)?;
        let mut conn = self.conn.clone();
        run_query(&mut conn, organization_id, query, true).await?;
        Ok(())
    }

    /// Cosine-similarity nearest-neighbor search over `Entity.name_embedding`
    /// within a tenant's graph, returning candidate rows for the retrieval
    /// layer to rank and fuse.
    #[instrument(skip(self, embedding))]
    pub async fn vector_search(
        &self,
        organization_id: &str,
        entity_type: Option<&str>,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<GraphRow>, GraphError> {
        require_tenant(organization_id)?;
        if embedding.len() != self.embedding_dimension {
            return Err(GraphError::QueryFailed(format!(
                "embedding dimension {} does not match configured dimension {}",
                embedding.len(),
                self.embedding_dimension
            )));
        }

        let label_filter = entity_type
            .map(|t| format!("WHERE n.entity_type = \"{t}\""))
            .unwrap_or_default();
        let query = format!(
            "CALL db.idx.vector.queryNodes('Entity', 'name_embedding', $k, vecf32($embedding)) \
             YIELD node AS n, score {label_filter} RETURN n.id AS id, n.name AS name, score ORDER BY score DESC"
        );
        let vec_json: Vec<JsonValue> = embedding.iter().map(|f| JsonValue::from(*f as f64)).collect();
        self.execute_read(
            organization_id,
            &["id", "name", "score"],
            &query,
            &[
                ("k", JsonValue::from(k as u64)),
                ("embedding", JsonValue::Array(vec_json)),
            ],
        )
        .await
    }
}

async fn run_query(
    conn: &mut ConnectionManager,
    graph_name: &str,
    query: &str,
    is_write: bool,
) -> Result<redis::Value, GraphError> {
    let command = if is_write { "GRAPH.QUERY" } else { "GRAPH.RO_QUERY" };
    debug!(graph_name, command, "executing graph query");
    let reply: redis::Value = redis::cmd(command)
        .arg(graph_name)
        .arg(query)
        .query_async(conn)
        .await
        .map_err(|e| GraphError::QueryFailed(e.to_string()))?;
    Ok(extract_rows(reply))
}

/// FalkorDB's `GRAPH.QUERY` reply shape is `[header, rows, stats]`; we only
/// need the `rows` element, the middle of the triple.
fn extract_rows(value: redis::Value) -> redis::Value {
    if let redis::Value::Array(mut parts) = value {
        if parts.len() >= 2 {
            return parts.remove(1);
        }
    }
    redis::Value::Array(Vec::new())
}

fn require_tenant(organization_id: &str) -> Result<(), GraphError> {
    if organization_id.trim().is_empty() {
        return Err(GraphError::TenantMissing);
    }
    Ok(())
}

fn already_exists(err: &GraphError) -> bool {
    match err {
        GraphError::QueryFailed(msg) => {
            let lower = msg.to_lowercase();
            lower.contains("already indexed") || lower.contains("exists")
        }
        _ => false,
    }
}

fn is_retryable(err: &GraphError) -> bool {
    matches!(err, GraphError::QueryFailed(_) | GraphError::NotConnected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_tenant_rejects_empty() {
        assert!(matches!(require_tenant(""), Err(GraphError::TenantMissing)));
        assert!(require_tenant("org_1").is_ok());
    }

    #[test]
    fn already_exists_matches_index_conflict_messages() {
        assert!(already_exists(&GraphError::QueryFailed("Attribute already indexed".into())));
        assert!(already_exists(&GraphError::QueryFailed("index already exists".into())));
        assert!(!already_exists(&GraphError::QueryFailed("connection reset".into())));
    }

    #[test]
    fn is_retryable_allows_query_failures_not_tenant_errors() {
        assert!(is_retryable(&GraphError::QueryFailed("timeout".into())));
        assert!(!is_retryable(&GraphError::TenantMissing));
    }

    #[test]
    fn extract_rows_pulls_middle_element() {
        let reply = redis::Value::Array(vec![
            redis::Value::Array(vec![]),
            redis::Value::Array(vec![redis::Value::Int(1)]),
            redis::Value::Array(vec![]),
        ]);
        let rows = extract_rows(reply);
        assert_eq!(rows, redis::Value::Array(vec![redis::Value::Int(1)]));
    }

    #[test]
    fn extract_rows_empty_on_malformed_reply() {
        let rows = extract_rows(redis::Value::Nil);
        assert_eq!(rows, redis::Value::Array(Vec::new()));
    }
}
