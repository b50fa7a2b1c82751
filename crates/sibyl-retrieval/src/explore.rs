//! `explore(mode, ...)` (§4.8 tail): graph-native lookups that complement
//! `search` — plain listing, direct relationships, bounded traversal, and
//! dependency-ordered task listing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use sibyl_graph::GraphClient;
use tracing::instrument;

use crate::errors::RetrievalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExploreMode {
    List,
    Related,
    Traverse,
    Dependencies,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExploreNode {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub depth: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DependencyNode {
    pub id: String,
    pub name: String,
    pub depth: usize,
}

pub struct ExploreEngine {
    graph: Arc<GraphClient>,
}

impl ExploreEngine {
    pub fn new(graph: Arc<GraphClient>) -> Self {
        Self { graph }
    }

    #[instrument(skip(self))]
    pub async fn list(&self, organization_id: &str, entity_type: &str, limit: usize) -> Result<Vec<ExploreNode>, RetrievalError> {
        let rows = self
            .graph
            .execute_read(
                organization_id,
                &["id", "name", "type"],
                "MATCH (n:Entity {entity_type: $entity_type}) RETURN n.id AS id, n.name AS name, n.entity_type AS type LIMIT $limit",
                &[("entity_type", json!(entity_type)), ("limit", json!(limit as u64))],
            )
            .await
            .map_err(|e| RetrievalError::Graph(e.to_string()))?;
        Ok(rows_to_nodes(rows, 0))
    }

    #[instrument(skip(self))]
    pub async fn related(&self, organization_id: &str, entity_id: &str, limit: usize) -> Result<Vec<ExploreNode>, RetrievalError> {
        let rows = self
            .graph
            .execute_read(
                organization_id,
                &["id", "name", "type"],
                "MATCH (n:Entity {id: $id})-[r]-(m:Entity) RETURN DISTINCT m.id AS id, m.name AS name, m.entity_type AS type LIMIT $limit",
                &[("id", json!(entity_id)), ("limit", json!(limit as u64))],
            )
            .await
            .map_err(|e| RetrievalError::Graph(e.to_string()))?;
        Ok(rows_to_nodes(rows, 1))
    }

    #[instrument(skip(self))]
    pub async fn traverse(&self, organization_id: &str, entity_id: &str, depth: usize, limit: usize) -> Result<Vec<ExploreNode>, RetrievalError> {
        let depth = depth.max(1);
        let query = format!(
            "MATCH path = (n:Entity {{id: $id}})-[*1..{depth}]-(m:Entity) \
             RETURN DISTINCT m.id AS id, m.name AS name, m.entity_type AS type, length(path) AS depth \
             LIMIT $limit"
        );
        let rows = self
            .graph
            .execute_read(organization_id, &["id", "name", "type", "depth"], &query, &[("id", json!(entity_id)), ("limit", json!(limit as u64))])
            .await
            .map_err(|e| RetrievalError::Graph(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.get("id").and_then(JsonValue::as_str)?.to_string();
                Some(ExploreNode {
                    id,
                    name: row.get("name").and_then(JsonValue::as_str).unwrap_or_default().to_string(),
                    entity_type: row.get("type").and_then(JsonValue::as_str).unwrap_or_default().to_string(),
                    depth: row.get("depth").and_then(JsonValue::as_u64).unwrap_or(0) as usize,
                })
            })
            .collect())
    }

    /// DFS along outgoing `DEPENDS_ON`, cycle-detected, returning tasks in
    /// reverse-topological order (dependencies first) with depth
    /// annotations — `depth` is the longest dependency chain beneath a node.
    #[instrument(skip(self))]
    pub async fn dependencies(&self, organization_id: &str, task_id: &str) -> Result<Vec<DependencyNode>, RetrievalError> {
        let rows = self
            .graph
            .execute_read(
                organization_id,
                &["from_id", "to_id"],
                "MATCH (a:Entity)-[:DEPENDS_ON]->(b:Entity) RETURN a.id AS from_id, b.id AS to_id",
                &[],
            )
            .await
            .map_err(|e| RetrievalError::Graph(e.to_string()))?;

        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        for row in &rows {
            let (Some(from), Some(to)) = (
                row.get("from_id").and_then(JsonValue::as_str),
                row.get("to_id").and_then(JsonValue::as_str),
            ) else {
                continue;
            };
            edges.entry(from.to_string()).or_default().push(to.to_string());
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut on_stack: HashSet<String> = HashSet::new();
        let mut order: Vec<(String, usize)> = Vec::new();

        // Deterministic traversal order: sort starting nodes by id.
        let mut starts: Vec<String> = edges.keys().cloned().collect();
        starts.sort();
        for node in starts {
            if !visited.contains(&node) {
                visit_dependency(&node, &edges, &mut visited, &mut on_stack, &mut order)?;
            }
        }

        let names = self.fetch_names(organization_id, &order.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>()).await?;
        Ok(order
            .into_iter()
            .map(|(id, depth)| {
                let name = names.get(&id).cloned().unwrap_or_default();
                DependencyNode { id, name, depth }
            })
            .collect())
    }

    async fn fetch_names(&self, organization_id: &str, ids: &[String]) -> Result<HashMap<String, String>, RetrievalError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = self
            .graph
            .execute_read(
                organization_id,
                &["id", "name"],
                "MATCH (n:Entity) WHERE n.id IN $ids RETURN n.id AS id, n.name AS name",
                &[("ids", json!(ids))],
            )
            .await
            .map_err(|e| RetrievalError::Graph(e.to_string()))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.get("id").and_then(JsonValue::as_str)?.to_string();
                let name = row.get("name").and_then(JsonValue::as_str).unwrap_or_default().to_string();
                Some((id, name))
            })
            .collect())
    }
}

/// Depth-first visit used by `dependencies`: raises `DependencyCycle` the
/// moment a node already on the current recursion stack is re-entered, and
/// records each node's depth as the longest dependency chain beneath it.
fn visit_dependency(
    node: &str,
    edges: &HashMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
    on_stack: &mut HashSet<String>,
    order: &mut Vec<(String, usize)>,
) -> Result<usize, RetrievalError> {
    if on_stack.contains(node) {
        return Err(RetrievalError::DependencyCycle { from_id: node.to_string(), to_id: node.to_string() });
    }
    if visited.contains(node) {
        return Ok(order.iter().find(|(id, _)| id == node).map(|(_, d)| *d).unwrap_or(0));
    }
    on_stack.insert(node.to_string());

    let mut max_child_depth = 0usize;
    if let Some(children) = edges.get(node) {
        for child in children {
            let child_depth = visit_dependency(child, edges, visited, on_stack, order)?;
            max_child_depth = max_child_depth.max(child_depth + 1);
        }
    }

    on_stack.remove(node);
    visited.insert(node.to_string());
    order.push((node.to_string(), max_child_depth));
    Ok(max_child_depth)
}

fn rows_to_nodes(rows: Vec<HashMap<String, JsonValue>>, depth: usize) -> Vec<ExploreNode> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.get("id").and_then(JsonValue::as_str)?.to_string();
            Some(ExploreNode {
                id,
                name: row.get("name").and_then(JsonValue::as_str).unwrap_or_default().to_string(),
                entity_type: row.get("type").and_then(JsonValue::as_str).unwrap_or_default().to_string(),
                depth,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_cycle_is_detected_without_panicking() {
        let mut edges = HashMap::new();
        edges.insert("a".to_string(), vec!["b".to_string()]);
        edges.insert("b".to_string(), vec!["a".to_string()]);

        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut order = Vec::new();

        let result = visit_dependency("a", &edges, &mut visited, &mut on_stack, &mut order);
        assert!(result.is_err());
    }

    #[test]
    fn dependency_depth_reflects_longest_chain() {
        let mut edges = HashMap::new();
        edges.insert("top".to_string(), vec!["mid".to_string()]);
        edges.insert("mid".to_string(), vec!["leaf".to_string()]);

        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut order = Vec::new();
        visit_dependency("top", &edges, &mut visited, &mut on_stack, &mut order).unwrap();

        let depth_of = |id: &str| order.iter().find(|(n, _)| n == id).map(|(_, d)| *d).unwrap();
        assert_eq!(depth_of("leaf"), 0);
        assert_eq!(depth_of("mid"), 1);
        assert_eq!(depth_of("top"), 2);
        // Leaf finishes DFS first (dependencies-first order).
        assert_eq!(order[0].0, "leaf");
    }

    #[test]
    fn rows_to_nodes_skips_rows_without_id() {
        let mut row = HashMap::new();
        row.insert("name".to_string(), json!("orphan"));
        let nodes = rows_to_nodes(vec![row], 0);
        assert!(nodes.is_empty());
    }
}
