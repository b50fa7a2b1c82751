//! Full ingestion pipeline (component G): crawl -> chunk -> embed -> store
//! -> link -> tag, with per-document progress callbacks feeding the job
//! queue's `crawl_progress`/`crawl_complete` events.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use sibyl_common::document::{CrawlSource, CrawledDocument, DocumentChunk};
use sibyl_common::ids::entity_id;
use sibyl_docstore::DocStore;
use sibyl_graph::GraphClient;
use sibyl_queue::CrawlStats;
use tracing::{info, instrument, warn};

use crate::chunker::{ChunkSource, ChunkStrategy, ChunkerConfig, DocumentChunker};
use crate::crawler::SourceCrawler;
use crate::embedder::BatchEmbedder;
use crate::errors::IngestError;
use crate::graph_link;
use crate::tagger;

pub type ProgressCallback = Arc<dyn Fn(&CrawlStats, u32) + Send + Sync>;

pub struct IngestionPipeline {
    organization_id: String,
    crawler: Arc<dyn SourceCrawler>,
    chunker: DocumentChunker,
    chunk_strategy: ChunkStrategy,
    embedder: Option<BatchEmbedder>,
    docstore: Arc<DocStore>,
    graph: Option<Arc<GraphClient>>,
    http_client: reqwest::Client,
}

pub struct IngestionPipelineConfig {
    pub chunk_strategy: ChunkStrategy,
    pub chunker_config: ChunkerConfig,
    pub integrate_with_graph: bool,
}

impl Default for IngestionPipelineConfig {
    fn default() -> Self {
        Self {
            chunk_strategy: ChunkStrategy::Semantic,
            chunker_config: ChunkerConfig::default(),
            integrate_with_graph: true,
        }
    }
}

impl IngestionPipeline {
    pub fn new(
        organization_id: impl Into<String>,
        crawler: Arc<dyn SourceCrawler>,
        embedder: Option<BatchEmbedder>,
        docstore: Arc<DocStore>,
        graph: Option<Arc<GraphClient>>,
        config: IngestionPipelineConfig,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            crawler,
            chunker: DocumentChunker::new(config.chunker_config),
            chunk_strategy: config.chunk_strategy,
            embedder,
            docstore,
            graph: if config.integrate_with_graph { graph } else { None },
            http_client: reqwest::Client::new(),
        }
    }

    #[instrument(skip(self, source, on_progress))]
    pub async fn ingest_source(
        &self,
        source: &CrawlSource,
        on_progress: Option<ProgressCallback>,
    ) -> Result<CrawlStats, IngestError> {
        if self.organization_id.trim().is_empty() {
            return Err(IngestError::TenantMissing);
        }
        let started = Instant::now();
        let mut stats = CrawlStats::default();

        let raw_docs = self.crawler.enumerate(source).await?;
        let mut seen_urls = HashSet::new();
        let mut bodies_for_tagging = Vec::new();

        for raw in raw_docs {
            stats.documents_crawled += 1;
            if !seen_urls.insert(raw.url.clone()) {
                continue;
            }

            let document_id = entity_id("doc", &[&source.id, &raw.url]);
            let section_path: Vec<String> = Vec::new();
            let chunk_source = ChunkSource {
                title: raw.title.as_deref(),
                url: raw.url.as_str(),
                section_path: &section_path,
                content: raw.content.as_str(),
            };
            let raw_chunks = self.chunker.chunk_document(&chunk_source, self.chunk_strategy);
            if raw_chunks.is_empty() {
                continue;
            }

            let texts: Vec<String> = raw_chunks
                .iter()
                .map(|c| c.context.clone().unwrap_or_else(|| c.content.clone()))
                .collect();

            let embeddings = if let Some(embedder) = &self.embedder {
                let (vectors, errors) = embedder.embed_all(&texts).await;
                stats.errors += errors;
                stats.embeddings_generated += vectors.iter().filter(|v| v.is_some()).count() as u32;
                vectors
            } else {
                vec![None; texts.len()]
            };

            let chunks: Vec<DocumentChunk> = raw_chunks
                .into_iter()
                .zip(embeddings)
                .enumerate()
                .map(|(i, (c, embedding))| DocumentChunk {
                    id: entity_id("chunk", &[&document_id, &i.to_string()]),
                    document_id: document_id.clone(),
                    chunk_index: c.chunk_index,
                    chunk_type: c.chunk_type,
                    content: c.content,
                    context: c.context,
                    token_count: c.token_count,
                    start_char: c.start_char,
                    end_char: c.end_char,
                    heading_path: c.heading_path,
                    language: c.language,
                    embedding,
                    is_complete: true,
                    has_entities: false,
                    entity_ids: Vec::new(),
                })
                .collect();

            let document = CrawledDocument {
                id: document_id.clone(),
                source_id: source.id.clone(),
                url: raw.url.clone(),
                title: raw.title.clone(),
                content: raw.content.clone(),
                headings: Vec::new(),
                section_path: Vec::new(),
                word_count: raw.content.split_whitespace().count() as u32,
                has_code: raw.content.contains("```"),
                language: raw.language.clone(),
                created_at: chrono::Utc::now(),
            };

            match self.docstore.store_document(&document, &chunks).await {
                Ok(()) => {
                    stats.documents_stored += 1;
                    stats.chunks_created += chunks.len() as u32;
                    bodies_for_tagging.push(raw.content.clone());

                    if let Some(graph) = &self.graph {
                        match graph_link::link_chunks_to_document(graph, &self.organization_id, &document_id, &chunks).await {
                            Ok(linked) => info!(document_id = %document_id, linked, "linked entities to document"),
                            Err(err) => warn!(document_id = %document_id, error = %err, "graph linking failed, continuing"),
                        }
                    }
                }
                Err(err) => {
                    warn!(url = %raw.url, error = %err, "storing document failed, skipping");
                    stats.errors += 1;
                    continue;
                }
            }

            if let Some(cb) = &on_progress {
                cb(&stats, 1);
            }
        }

        let (tags, categories) = tagger::aggregate_tags(&bodies_for_tagging);
        let favicon_url = tagger::fetch_favicon_url(&self.http_client, &source.url).await;

        let mut updated_source = source.clone();
        updated_source.document_count = stats.documents_stored;
        updated_source.chunk_count = stats.chunks_created;
        updated_source.tags = tags;
        updated_source.categories = categories;
        updated_source.favicon_url = favicon_url;
        updated_source.last_crawled_at = Some(chrono::Utc::now());
        updated_source.status = sibyl_common::document::CrawlStatus::Completed;
        self.docstore
            .upsert_source(&updated_source)
            .await
            .map_err(|e| IngestError::Store(e.to_string()))?;

        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(source_id = %source.id, ?stats, "ingestion complete");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_semantic_strategy() {
        let config = IngestionPipelineConfig::default();
        assert_eq!(config.chunk_strategy, ChunkStrategy::Semantic);
        assert!(config.integrate_with_graph);
    }
}
