//! Entity deduplication by embedding similarity (§4.9, component H).
//!
//! Finds near-duplicate `Entity` nodes within a tenant's graph and merges
//! them, redirecting relationships onto the surviving id. FalkorDB/Cypher
//! has no dynamic relationship type in `MERGE`, so redirected edges keep
//! their original type as a `relationship_type` property on a generic
//! `RELATIONSHIP` edge, exactly as the upstream merge does.

use serde_json::{json, Value as JsonValue};
use sibyl_graph::GraphClient;
use tracing::{debug, instrument, warn};

use crate::errors::RetrievalError;

#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub similarity_threshold: f32,
    pub batch_size: usize,
    pub same_type_only: bool,
    pub min_name_overlap: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.95,
            batch_size: 100,
            same_type_only: true,
            min_name_overlap: 0.3,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DuplicatePair {
    pub entity1_id: String,
    pub entity2_id: String,
    pub similarity: f32,
    pub entity1_name: String,
    pub entity2_name: String,
    pub entity_type: String,
    pub suggested_keep: String,
}

/// Cosine similarity of two equal-length vectors. Zero on length mismatch,
/// an empty vector, or a zero-norm vector (matches the upstream's
/// division-by-zero guard rather than returning NaN).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Word-level Jaccard similarity, case-insensitive.
pub fn jaccard_similarity(s1: &str, s2: &str) -> f32 {
    use std::collections::HashSet;
    let lower1 = s1.to_lowercase();
    let lower2 = s2.to_lowercase();
    let words1: HashSet<&str> = lower1.split_whitespace().collect();
    let words2: HashSet<&str> = lower2.split_whitespace().collect();

    if words1.is_empty() && words2.is_empty() {
        return 1.0;
    }
    if words1.is_empty() || words2.is_empty() {
        return 0.0;
    }
    let intersection = words1.intersection(&words2).count();
    let union = words1.union(&words2).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Prefers the longer, more descriptive name; falls back to the first id
/// for a stable, arbitrary tie-break.
fn suggest_keep(id1: &str, id2: &str, name1: &str, name2: &str) -> String {
    if name1.len() > name2.len() + 5 {
        return id1.to_string();
    }
    if name2.len() > name1.len() + 5 {
        return id2.to_string();
    }
    id1.to_string()
}

struct EmbeddedEntity {
    id: String,
    name: String,
    entity_type: String,
    embedding: Vec<f32>,
}

pub struct EntityDeduplicator<'a> {
    graph: &'a GraphClient,
    organization_id: String,
    config: DedupConfig,
    pending_pairs: Vec<DuplicatePair>,
}

impl<'a> EntityDeduplicator<'a> {
    pub fn new(graph: &'a GraphClient, organization_id: impl Into<String>, config: DedupConfig) -> Self {
        Self {
            graph,
            organization_id: organization_id.into(),
            config,
            pending_pairs: Vec::new(),
        }
    }

    pub fn pending_pairs(&self) -> &[DuplicatePair] {
        &self.pending_pairs
    }

    #[instrument(skip(self))]
    pub async fn find_duplicates(
        &mut self,
        entity_types: Option<&[String]>,
        threshold: Option<f32>,
    ) -> Result<Vec<DuplicatePair>, RetrievalError> {
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);
        let entities = self.fetch_entities_with_embeddings(entity_types).await?;

        if entities.len() < 2 {
            debug!(count = entities.len(), "not enough embedded entities to dedup");
            return Ok(Vec::new());
        }

        let mut pairs = self.find_similar_pairs(&entities, threshold);
        pairs.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        self.pending_pairs = pairs.clone();
        Ok(pairs)
    }

    fn find_similar_pairs(&self, entities: &[EmbeddedEntity], threshold: f32) -> Vec<DuplicatePair> {
        let n = entities.len();
        let mut pairs = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                let sim = cosine_similarity(&entities[i].embedding, &entities[j].embedding);
                if sim < threshold {
                    continue;
                }
                if self.config.same_type_only && entities[i].entity_type != entities[j].entity_type {
                    continue;
                }
                if self.config.min_name_overlap > 0.0 {
                    let name_sim = jaccard_similarity(&entities[i].name, &entities[j].name);
                    if name_sim < self.config.min_name_overlap {
                        continue;
                    }
                }
                let keep = suggest_keep(&entities[i].id, &entities[j].id, &entities[i].name, &entities[j].name);
                pairs.push(DuplicatePair {
                    entity1_id: entities[i].id.clone(),
                    entity2_id: entities[j].id.clone(),
                    similarity: sim,
                    entity1_name: entities[i].name.clone(),
                    entity2_name: entities[j].name.clone(),
                    entity_type: entities[i].entity_type.clone(),
                    suggested_keep: keep,
                });
            }
        }
        pairs
    }

    async fn fetch_entities_with_embeddings(
        &self,
        entity_types: Option<&[String]>,
    ) -> Result<Vec<EmbeddedEntity>, RetrievalError> {
        let (type_filter, params) = match entity_types {
            Some(types) if !types.is_empty() => (
                "AND n.entity_type IN $types",
                vec![("types", json!(types))],
            ),
            _ => ("", Vec::new()),
        };
        let query = format!(
            "MATCH (n:Entity) WHERE n.name_embedding IS NOT NULL {type_filter} \
             RETURN n.id AS id, n.name AS name, n.entity_type AS type, n.name_embedding AS embedding"
        );

        let rows = self
            .graph
            .execute_read(&self.organization_id, &["id", "name", "type", "embedding"], &query, &params)
            .await
            .map_err(|e| RetrievalError::Graph(e.to_string()))?;

        let mut entities = Vec::new();
        for row in rows {
            let id = row.get("id").and_then(JsonValue::as_str).unwrap_or_default().to_string();
            let name = row.get("name").and_then(JsonValue::as_str).unwrap_or_default().to_string();
            let entity_type = row.get("type").and_then(JsonValue::as_str).unwrap_or_default().to_string();
            let embedding: Vec<f32> = row
                .get("embedding")
                .and_then(JsonValue::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
                .unwrap_or_default();
            if id.is_empty() || embedding.is_empty() {
                continue;
            }
            entities.push(EmbeddedEntity { id, name, entity_type, embedding });
        }
        Ok(entities)
    }

    /// Merges `remove_id` into `keep_id`: redirects relationships, optionally
    /// unions metadata (keep wins on key conflict), deletes the duplicate,
    /// and evicts any cached pair referencing either id.
    #[instrument(skip(self))]
    pub async fn merge_entities(
        &mut self,
        keep_id: &str,
        remove_id: &str,
        merge_metadata: bool,
    ) -> Result<bool, RetrievalError> {
        let keep_rows = self
            .graph
            .execute_read(
                &self.organization_id,
                &["metadata"],
                "MATCH (n:Entity {id: $id}) RETURN n.metadata AS metadata",
                &[("id", json!(keep_id))],
            )
            .await
            .map_err(|e| RetrievalError::Graph(e.to_string()))?;
        let remove_rows = self
            .graph
            .execute_read(
                &self.organization_id,
                &["metadata"],
                "MATCH (n:Entity {id: $id}) RETURN n.metadata AS metadata",
                &[("id", json!(remove_id))],
            )
            .await
            .map_err(|e| RetrievalError::Graph(e.to_string()))?;

        if keep_rows.is_empty() || remove_rows.is_empty() {
            warn!(keep_id, remove_id, "merge_entities: one or both entities not found");
            return Ok(false);
        }

        self.redirect_relationships(remove_id, keep_id).await?;

        if merge_metadata {
            let remove_meta = remove_rows[0].get("metadata").and_then(JsonValue::as_object);
            let keep_meta = keep_rows[0].get("metadata").and_then(JsonValue::as_object);
            if let Some(remove_meta) = remove_meta {
                if !remove_meta.is_empty() {
                    // Keep entity's own keys win on conflict.
                    let mut merged = remove_meta.clone();
                    if let Some(keep_meta) = keep_meta {
                        merged.extend(keep_meta.clone());
                    }
                    self.graph
                        .execute_write(
                            &self.organization_id,
                            &[],
                            "MATCH (n:Entity {id: $id}) SET n.metadata = $metadata",
                            &[("id", json!(keep_id)), ("metadata", JsonValue::Object(merged))],
                        )
                        .await
                        .map_err(|e| RetrievalError::Graph(e.to_string()))?;
                }
            }
        }

        self.graph
            .execute_write(
                &self.organization_id,
                &[],
                "MATCH (n:Entity {id: $id}) DETACH DELETE n",
                &[("id", json!(remove_id))],
            )
            .await
            .map_err(|e| RetrievalError::Graph(e.to_string()))?;

        self.pending_pairs.retain(|p| p.entity1_id != remove_id && p.entity2_id != remove_id);

        debug!(keep_id, remove_id, "merged duplicate entities");
        Ok(true)
    }

    async fn redirect_relationships(&self, from_id: &str, to_id: &str) -> Result<u64, RetrievalError> {
        let outgoing = "MATCH (source:Entity {id: $from_id})-[r]->(target) \
             WHERE target.id <> $to_id \
             WITH source, r, target, type(r) AS rel_type, properties(r) AS props \
             MERGE (keep:Entity {id: $to_id}) \
             MERGE (keep)-[new_r:RELATIONSHIP]->(target) \
             SET new_r = props, new_r.relationship_type = rel_type \
             DELETE r \
             RETURN count(r) AS redirected";
        let incoming = "MATCH (source)-[r]->(target:Entity {id: $from_id}) \
             WHERE source.id <> $to_id \
             WITH source, r, target, type(r) AS rel_type, properties(r) AS props \
             MERGE (keep:Entity {id: $to_id}) \
             MERGE (source)-[new_r:RELATIONSHIP]->(keep) \
             SET new_r = props, new_r.relationship_type = rel_type \
             DELETE r \
             RETURN count(r) AS redirected";

        let mut total = 0u64;
        for query in [outgoing, incoming] {
            let rows = self
                .graph
                .execute_write(
                    &self.organization_id,
                    &["redirected"],
                    query,
                    &[("from_id", json!(from_id)), ("to_id", json!(to_id))],
                )
                .await
                .map_err(|e| RetrievalError::Graph(e.to_string()))?;
            if let Some(row) = rows.first() {
                total += row.get("redirected").and_then(JsonValue::as_u64).unwrap_or(0);
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_length_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn jaccard_similarity_both_empty_is_one() {
        assert_eq!(jaccard_similarity("", ""), 1.0);
    }

    #[test]
    fn jaccard_similarity_one_empty_is_zero() {
        assert_eq!(jaccard_similarity("hello world", ""), 0.0);
    }

    #[test]
    fn jaccard_similarity_partial_overlap() {
        let sim = jaccard_similarity("user auth service", "auth service layer");
        assert!(sim > 0.0 && sim < 1.0);
    }

    #[test]
    fn suggest_keep_prefers_longer_name_by_more_than_five_chars() {
        assert_eq!(suggest_keep("a", "b", "Auth", "Authentication Service"), "b");
        assert_eq!(suggest_keep("a", "b", "Authentication Service", "Auth"), "a");
    }

    #[test]
    fn suggest_keep_falls_back_to_first_id_when_names_are_close_in_length() {
        assert_eq!(suggest_keep("id1", "id2", "Auth", "Auths"), "id1");
    }
}
