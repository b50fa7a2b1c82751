//! Hybrid retrieval engine (§4.8, component H): vector + BM25 + graph
//! traversal fused over the entity graph, merged with a document-chunk
//! cosine stream, ranked, paginated, and traced back to origin.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use sibyl_cache::QueryCache;
use sibyl_docstore::DocStore;
use sibyl_graph::GraphClient;
use tracing::{debug, instrument, warn};

use crate::embedding::QueryEmbedder;
use crate::errors::RetrievalError;
use crate::rrf::{self, RankedList};
use crate::types::{ResultOrigin, SearchFilters, SearchHit};
use crate::keyword_index::KeywordIndex;

const DEFAULT_ENTITY_TYPES: &[&str] = &["pattern", "rule", "template", "topic", "episode", "task", "project"];
const DEFAULT_TRAVERSAL_DEPTH: usize = 2;
const DEFAULT_DECAY_DAYS: f64 = 365.0;

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub rrf_k: f64,
    pub graph_weight: f64,
    pub bm25_weight: f64,
    pub traversal_weight: f64,
    pub enable_bm25: bool,
    pub enable_traversal: bool,
    pub enable_temporal_boost: bool,
    pub decay_days: f64,
    pub traversal_depth: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: rrf::DEFAULT_K,
            graph_weight: 1.0,
            bm25_weight: 1.0,
            traversal_weight: 0.5,
            enable_bm25: true,
            enable_traversal: true,
            enable_temporal_boost: true,
            decay_days: DEFAULT_DECAY_DAYS,
            traversal_depth: DEFAULT_TRAVERSAL_DEPTH,
        }
    }
}

struct CandidateEntity {
    id: String,
    name: String,
    entity_type: String,
    description: String,
    language: Option<String>,
    category: Option<String>,
    status: Option<String>,
    project_id: Option<String>,
    assignee: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    metadata: JsonValue,
}

pub struct HybridRetrievalEngine {
    graph: Arc<GraphClient>,
    docstore: Arc<DocStore>,
    embedder: Arc<dyn QueryEmbedder>,
    cache: Option<Arc<QueryCache>>,
    config: RetrievalConfig,
}

impl HybridRetrievalEngine {
    pub fn new(
        graph: Arc<GraphClient>,
        docstore: Arc<DocStore>,
        embedder: Arc<dyn QueryEmbedder>,
        cache: Option<Arc<QueryCache>>,
        config: RetrievalConfig,
    ) -> Self {
        Self { graph, docstore, embedder, cache, config }
    }

    #[instrument(skip(self, filters))]
    pub async fn search(
        &self,
        organization_id: &str,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        if organization_id.trim().is_empty() {
            return Err(RetrievalError::TenantMissing);
        }
        let limit = limit.max(1);

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get_search(query, &(filters_cache_key(filters), limit, offset)) {
                if let Ok(hits) = serde_json::from_value::<Vec<SearchHit>>(cached) {
                    debug!("search cache hit");
                    return Ok(hits);
                }
            }
        }

        let graph_hits = self.graph_stream(organization_id, query, filters, limit).await?;
        let document_hits = if query.trim().is_empty() {
            // Edge case: empty query degenerates to a filtered graph-only list.
            Vec::new()
        } else {
            self.document_stream(organization_id, query, filters, limit).await?
        };

        let mut merged: HashMap<String, SearchHit> = HashMap::new();
        for hit in graph_hits.into_iter().chain(document_hits) {
            merged
                .entry(hit.id.clone())
                .and_modify(|existing| {
                    if hit.score > existing.score {
                        *existing = hit.clone();
                    }
                })
                .or_insert(hit);
        }

        let mut all: Vec<SearchHit> = merged.into_values().collect();
        all.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let page: Vec<SearchHit> = all.into_iter().skip(offset).take(limit).collect();

        if let Some(cache) = &self.cache {
            if let Ok(json) = serde_json::to_value(&page) {
                cache.set_search(query, &(filters_cache_key(filters), limit, offset), json, None);
            }
        }

        Ok(page)
    }

    async fn graph_stream(
        &self,
        organization_id: &str,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        let allowed_types: Vec<String> = if filters.entity_types.is_empty() {
            DEFAULT_ENTITY_TYPES.iter().map(|s| s.to_string()).collect()
        } else {
            filters.entity_types.clone()
        };

        let k = (limit * 5).max(limit);
        let mut vector_ids: Vec<String> = Vec::new();
        if !query.trim().is_empty() {
            let embedding = self.embedder.embed(query).await?;
            let rows = self
                .graph
                .vector_search(organization_id, None, &embedding, k)
                .await
                .map_err(|e| RetrievalError::Graph(e.to_string()))?;
            vector_ids = rows
                .into_iter()
                .filter_map(|row| row.get("id").and_then(JsonValue::as_str).map(str::to_string))
                .collect();
        } else {
            // Empty query with filters: pull a filtered list directly.
            vector_ids = self.list_entities(organization_id, &allowed_types, limit * 5).await?;
        }

        if vector_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut traversal_ids: Vec<String> = Vec::new();
        if self.config.enable_traversal && !query.trim().is_empty() {
            traversal_ids = self
                .traverse_neighbors(organization_id, &vector_ids, self.config.traversal_depth)
                .await
                .unwrap_or_default();
        }

        let candidate_ids: Vec<String> = {
            let mut seen = HashSet::new();
            vector_ids
                .iter()
                .chain(traversal_ids.iter())
                .filter(|id| seen.insert((*id).clone()))
                .cloned()
                .collect()
        };

        let candidates = self.fetch_entities(organization_id, &candidate_ids).await?;
        let by_id: HashMap<String, &CandidateEntity> = candidates.iter().map(|c| (c.id.clone(), c)).collect();

        let mut lists = vec![RankedList {
            name: "vector".to_string(),
            weight: self.config.graph_weight,
            ids: vector_ids.iter().filter(|id| by_id.contains_key(*id)).cloned().collect(),
        }];

        if !traversal_ids.is_empty() {
            lists.push(RankedList {
                name: "graph_traversal".to_string(),
                weight: self.config.traversal_weight,
                ids: traversal_ids.iter().filter(|id| by_id.contains_key(*id)).cloned().collect(),
            });
        }

        if self.config.enable_bm25 && !query.trim().is_empty() {
            let entries: Vec<(String, String, String)> = candidates
                .iter()
                .map(|c| (c.id.clone(), c.name.clone(), c.description.clone()))
                .collect();
            if !entries.is_empty() {
                match KeywordIndex::build(&entries) {
                    Ok(index) => match index.search(query, k) {
                        Ok(bm25_hits) => {
                            lists.push(RankedList {
                                name: "bm25".to_string(),
                                weight: self.config.bm25_weight,
                                ids: bm25_hits.into_iter().map(|(id, _)| id).collect(),
                            });
                        }
                        Err(err) => warn!(error = %err, "bm25 search failed, skipping keyword stream"),
                    },
                    Err(err) => warn!(error = %err, "bm25 index build failed, skipping keyword stream"),
                }
            }
        }

        let fused = rrf::fuse(&lists, self.config.rrf_k);

        let mut hits = Vec::new();
        for entry in fused {
            let Some(candidate) = by_id.get(&entry.id) else { continue };
            if !self.passes_filters(candidate, filters, &allowed_types) {
                continue;
            }

            let mut score = entry.score;
            if self.config.enable_temporal_boost {
                if let Some(created_at) = candidate.created_at {
                    let age_days = (Utc::now() - created_at).num_seconds() as f64 / 86400.0;
                    score *= (-age_days.max(0.0) / self.config.decay_days).exp();
                }
            }

            hits.push(SearchHit {
                id: candidate.id.clone(),
                name: candidate.name.clone(),
                entity_type: Some(candidate.entity_type.clone()),
                score: score as f32,
                result_origin: ResultOrigin::Graph,
                list_trace: entry.trace,
                content: if filters.include_content { Some(candidate.description.clone()) } else { None },
                metadata: candidate.metadata.clone(),
            });
        }

        Ok(hits)
    }

    async fn document_stream(
        &self,
        organization_id: &str,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        let embedding = self.embedder.embed(query).await?;
        let language = filters.languages.first().map(String::as_str);
        let rows = self
            .docstore
            .search_chunks_by_similarity(organization_id, &embedding, filters.source_id.as_deref(), language, limit)
            .await
            .map_err(|e| RetrievalError::Store(e.to_string()))?;

        let mut best_per_document: HashMap<String, (f32, SearchHit)> = HashMap::new();
        for row in rows {
            if row.document_url.starts_with("file://") {
                continue;
            }

            let breadcrumb = if row.chunk.heading_path.is_empty() {
                String::new()
            } else {
                format!("{} > ", row.chunk.heading_path.join(" > "))
            };
            let max_chars = if filters.include_content { 500 } else { 200 };
            let truncated: String = format!("{breadcrumb}{}", row.chunk.content)
                .chars()
                .take(max_chars)
                .collect();

            let hit = SearchHit {
                id: row.document_id.clone(),
                name: row.document_title.clone().unwrap_or_else(|| row.document_url.clone()),
                entity_type: Some("document".to_string()),
                score: row.similarity,
                result_origin: ResultOrigin::Document,
                list_trace: vec![("document_cosine".to_string(), 1)],
                content: Some(truncated),
                metadata: json!({
                    "source_id": row.source_id,
                    "source_name": row.source_name,
                    "document_url": row.document_url,
                    "chunk_id": row.chunk.id,
                }),
            };

            best_per_document
                .entry(row.document_id)
                .and_modify(|(score, existing)| {
                    if row.similarity > *score {
                        *score = row.similarity;
                        *existing = hit.clone();
                    }
                })
                .or_insert((row.similarity, hit));
        }

        Ok(best_per_document.into_values().map(|(_, hit)| hit).collect())
    }

    async fn fetch_entities(&self, organization_id: &str, ids: &[String]) -> Result<Vec<CandidateEntity>, RetrievalError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .graph
            .execute_read(
                organization_id,
                &["id", "name", "type", "description", "language", "category", "status", "project_id", "assignee", "created_at", "updated_at", "metadata"],
                "MATCH (n:Entity) WHERE n.id IN $ids RETURN n.id AS id, n.name AS name, n.entity_type AS type, \
                 n.description AS description, n.language AS language, n.category AS category, \
                 n.status AS status, n.project_id AS project_id, n.assignee AS assignee, \
                 n.created_at AS created_at, n.updated_at AS updated_at, n.metadata AS metadata",
                &[("ids", json!(ids))],
            )
            .await
            .map_err(|e| RetrievalError::Graph(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.get("id").and_then(JsonValue::as_str)?.to_string();
                Some(CandidateEntity {
                    id,
                    name: row.get("name").and_then(JsonValue::as_str).unwrap_or_default().to_string(),
                    entity_type: row.get("type").and_then(JsonValue::as_str).unwrap_or_default().to_string(),
                    description: row.get("description").and_then(JsonValue::as_str).unwrap_or_default().to_string(),
                    language: row.get("language").and_then(JsonValue::as_str).map(str::to_string),
                    category: row.get("category").and_then(JsonValue::as_str).map(str::to_string),
                    status: row.get("status").and_then(JsonValue::as_str).map(str::to_string),
                    project_id: row.get("project_id").and_then(JsonValue::as_str).map(str::to_string),
                    assignee: row.get("assignee").and_then(JsonValue::as_str).map(str::to_string),
                    created_at: row
                        .get("created_at")
                        .and_then(JsonValue::as_str)
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.with_timezone(&Utc)),
                    updated_at: row
                        .get("updated_at")
                        .and_then(JsonValue::as_str)
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.with_timezone(&Utc)),
                    metadata: row.get("metadata").cloned().unwrap_or(JsonValue::Null),
                })
            })
            .collect())
    }

    async fn list_entities(&self, organization_id: &str, allowed_types: &[String], limit: usize) -> Result<Vec<String>, RetrievalError> {
        let rows = self
            .graph
            .execute_read(
                organization_id,
                &["id"],
                "MATCH (n:Entity) WHERE n.entity_type IN $types RETURN n.id AS id LIMIT $limit",
                &[("types", json!(allowed_types)), ("limit", json!(limit as u64))],
            )
            .await
            .map_err(|e| RetrievalError::Graph(e.to_string()))?;
        Ok(rows.into_iter().filter_map(|r| r.get("id").and_then(JsonValue::as_str).map(str::to_string)).collect())
    }

    async fn traverse_neighbors(&self, organization_id: &str, seeds: &[String], depth: usize) -> Result<Vec<String>, RetrievalError> {
        let depth = depth.max(1);
        let query = format!(
            "MATCH (n:Entity)-[*1..{depth}]-(m:Entity) WHERE n.id IN $seeds AND NOT m.id IN $seeds RETURN DISTINCT m.id AS id"
        );
        let rows = self
            .graph
            .execute_read(organization_id, &["id"], &query, &[("seeds", json!(seeds))])
            .await
            .map_err(|e| RetrievalError::Graph(e.to_string()))?;
        Ok(rows.into_iter().filter_map(|r| r.get("id").and_then(JsonValue::as_str).map(str::to_string)).collect())
    }

    fn passes_filters(&self, candidate: &CandidateEntity, filters: &SearchFilters, allowed_types: &[String]) -> bool {
        if !allowed_types.iter().any(|t| t == &candidate.entity_type) {
            return false;
        }
        if !filters.languages.is_empty() {
            match &candidate.language {
                Some(lang) if filters.languages.iter().any(|l| l == lang) => {}
                _ => return false,
            }
        }
        if let Some(substr) = &filters.category_substring {
            match &candidate.category {
                Some(cat) if cat.to_lowercase().contains(&substr.to_lowercase()) => {}
                _ => return false,
            }
        }
        if !filters.status_in.is_empty() {
            match &candidate.status {
                Some(status) if filters.status_in.iter().any(|s| s == status) => {}
                _ => return false,
            }
        }
        if let Some(projects) = &filters.accessible_projects {
            // A `None` candidate project_id means "unscoped", always visible;
            // otherwise require membership in the accessible set.
            if let Some(project_id) = &candidate.project_id {
                if !projects.iter().any(|p| p == project_id) {
                    return false;
                }
            }
        }
        if let Some(assignee) = &filters.assignee {
            if candidate.assignee.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        if let Some(since) = filters.since {
            match candidate.updated_at {
                Some(updated_at) if updated_at >= since => {}
                _ => return false,
            }
        }
        true
    }
}

fn filters_cache_key(filters: &SearchFilters) -> JsonValue {
    json!({
        "entity_types": filters.entity_types,
        "languages": filters.languages,
        "category_substring": filters.category_substring,
        "status_in": filters.status_in,
        "accessible_projects": filters.accessible_projects,
        "assignee": filters.assignee,
        "since": filters.since,
        "source_id": filters.source_id,
        "include_content": filters.include_content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = RetrievalConfig::default();
        assert_eq!(config.rrf_k, 60.0);
        assert_eq!(config.decay_days, 365.0);
        assert_eq!(config.traversal_depth, 2);
    }

    #[test]
    fn filters_cache_key_is_stable_json() {
        let filters = SearchFilters::default();
        let key1 = filters_cache_key(&filters);
        let key2 = filters_cache_key(&filters);
        assert_eq!(key1, key2);
    }
}
