//! Document store operations (component B): crawl sources, crawled
//! documents, and their chunks, plus the raw pgvector similarity primitive
//! that `sibyl-retrieval`'s document stream builds on.

use chrono::Utc;
use deadpool_postgres::Pool;
use pgvector::Vector;
use sibyl_common::document::{ChunkType, CrawlSource, CrawlStatus, CrawledDocument, DocumentChunk, SourceType};
use tracing::{info, instrument};

use crate::errors::DocStoreError;

pub struct DocStore {
    pool: Pool,
}

/// One candidate chunk returned from a similarity query, joined with its
/// parent document and source — the shape `sibyl-retrieval`'s document
/// stream consumes directly.
#[derive(Debug, Clone)]
pub struct ChunkSimilarityRow {
    pub chunk: DocumentChunk,
    pub document_id: String,
    pub document_title: Option<String>,
    pub document_url: String,
    pub source_id: String,
    pub source_name: String,
    pub similarity: f32,
}

impl DocStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), DocStoreError> {
        crate::schema::run_migrations(&self.pool).await
    }

    #[instrument(skip(self))]
    pub async fn upsert_source(&self, source: &CrawlSource) -> Result<(), DocStoreError> {
        require_tenant(&source.organization_id)?;
        let client = self.pool.get().await.map_err(|e| DocStoreError::Pool(e.to_string()))?;
        client
            .execute(
                "INSERT INTO crawl_sources (
                    id, organization_id, name, url, source_type, crawl_depth,
                    include_patterns, exclude_patterns, status, last_error,
                    document_count, chunk_count, last_crawled_at, tags, categories,
                    favicon_url, created_at, updated_at
                 ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
                 ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    status = EXCLUDED.status,
                    last_error = EXCLUDED.last_error,
                    document_count = EXCLUDED.document_count,
                    chunk_count = EXCLUDED.chunk_count,
                    last_crawled_at = EXCLUDED.last_crawled_at,
                    updated_at = EXCLUDED.updated_at",
                &[
                    &source.id,
                    &source.organization_id,
                    &source.name,
                    &source.url,
                    &source.source_type.to_string(),
                    &(source.crawl_depth as i32),
                    &source.include_patterns,
                    &source.exclude_patterns,
                    &source.status.to_string(),
                    &source.last_error,
                    &(source.document_count as i32),
                    &(source.chunk_count as i32),
                    &source.last_crawled_at,
                    &source.tags,
                    &source.categories,
                    &source.favicon_url,
                    &source.created_at,
                    &source.updated_at,
                ],
            )
            .await
            .map_err(|e| DocStoreError::Query(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_source(&self, organization_id: &str, source_id: &str) -> Result<CrawlSource, DocStoreError> {
        require_tenant(organization_id)?;
        let client = self.pool.get().await.map_err(|e| DocStoreError::Pool(e.to_string()))?;
        let row = client
            .query_opt(
                "SELECT id, organization_id, name, url, source_type, crawl_depth,
                        include_patterns, exclude_patterns, status, last_error,
                        document_count, chunk_count, last_crawled_at, tags, categories,
                        favicon_url, created_at, updated_at
                 FROM crawl_sources WHERE id = $1 AND organization_id = $2",
                &[&source_id, &organization_id],
            )
            .await
            .map_err(|e| DocStoreError::Query(e.to_string()))?
            .ok_or_else(|| DocStoreError::NotFound {
                kind: "crawl_source",
                id: source_id.to_string(),
            })?;

        Ok(CrawlSource {
            id: row.get("id"),
            organization_id: row.get("organization_id"),
            name: row.get("name"),
            url: row.get("url"),
            source_type: row.get::<_, String>("source_type").parse().unwrap_or(SourceType::Web),
            crawl_depth: row.get::<_, i32>("crawl_depth") as u32,
            include_patterns: row.get("include_patterns"),
            exclude_patterns: row.get("exclude_patterns"),
            status: row.get::<_, String>("status").parse().unwrap_or(CrawlStatus::Pending),
            last_error: row.get("last_error"),
            document_count: row.get::<_, i32>("document_count") as u32,
            chunk_count: row.get::<_, i32>("chunk_count") as u32,
            last_crawled_at: row.get("last_crawled_at"),
            tags: row.get("tags"),
            categories: row.get("categories"),
            favicon_url: row.get("favicon_url"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Insert a crawled document and its chunks in a single transaction.
    /// `(source_id, url)` is unique; re-crawling an already-seen URL
    /// replaces the prior document and its chunks rather than erroring,
    /// matching the source crawler's upsert-on-recrawl behavior.
    #[instrument(skip(self, document, chunks))]
    pub async fn store_document(
        &self,
        document: &CrawledDocument,
        chunks: &[DocumentChunk],
    ) -> Result<(), DocStoreError> {
        let mut client = self.pool.get().await.map_err(|e| DocStoreError::Pool(e.to_string()))?;
        let tx = client.transaction().await.map_err(|e| DocStoreError::Query(e.to_string()))?;

        tx.execute(
            "INSERT INTO crawled_documents (
                id, source_id, url, title, content, headings, section_path,
                word_count, has_code, language, created_at
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
             ON CONFLICT (source_id, url) DO UPDATE SET
                title = EXCLUDED.title,
                content = EXCLUDED.content,
                headings = EXCLUDED.headings,
                section_path = EXCLUDED.section_path,
                word_count = EXCLUDED.word_count,
                has_code = EXCLUDED.has_code,
                language = EXCLUDED.language",
            &[
                &document.id,
                &document.source_id,
                &document.url,
                &document.title,
                &document.content,
                &document.headings,
                &document.section_path,
                &(document.word_count as i32),
                &document.has_code,
                &document.language,
                &document.created_at,
            ],
        )
        .await
        .map_err(|e| DocStoreError::Query(e.to_string()))?;

        tx.execute("DELETE FROM document_chunks WHERE document_id = $1", &[&document.id])
            .await
            .map_err(|e| DocStoreError::Query(e.to_string()))?;

        for chunk in chunks {
            let embedding = chunk.embedding.as_ref().map(|v| Vector::from(v.clone()));
            tx.execute(
                "INSERT INTO document_chunks (
                    id, document_id, chunk_index, chunk_type, content, context,
                    token_count, start_char, end_char, heading_path, language,
                    embedding, is_complete, has_entities, entity_ids
                 ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
                &[
                    &chunk.id,
                    &chunk.document_id,
                    &(chunk.chunk_index as i32),
                    &chunk.chunk_type.to_string(),
                    &chunk.content,
                    &chunk.context,
                    &(chunk.token_count as i32),
                    &(chunk.start_char as i32),
                    &(chunk.end_char as i32),
                    &chunk.heading_path,
                    &chunk.language,
                    &embedding,
                    &chunk.is_complete,
                    &chunk.has_entities,
                    &chunk.entity_ids,
                ],
            )
            .await
            .map_err(|e| DocStoreError::Query(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| DocStoreError::Query(e.to_string()))?;
        info!(document_id = %document.id, chunk_count = chunks.len(), "stored document");
        Ok(())
    }

    /// Cosine-similarity search over chunk embeddings within a tenant,
    /// fetching `limit * fetch_multiplier` candidates so a caller can
    /// dedup to one result per document and still fill `limit` slots.
    /// Mirrors the source search tool's floor (0.5) and headroom (5x).
    #[instrument(skip(self, query_embedding))]
    pub async fn search_chunks_by_similarity(
        &self,
        organization_id: &str,
        query_embedding: &[f32],
        source_id: Option<&str>,
        language: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChunkSimilarityRow>, DocStoreError> {
        require_tenant(organization_id)?;
        let client = self.pool.get().await.map_err(|e| DocStoreError::Pool(e.to_string()))?;
        let embedding = Vector::from(query_embedding.to_vec());
        let fetch_limit = (limit * 5).max(limit) as i64;

        let rows = client
            .query(
                "SELECT c.id, c.document_id, c.chunk_index, c.chunk_type, c.content, c.context,
                        c.token_count, c.start_char, c.end_char, c.heading_path, c.language,
                        c.embedding, c.is_complete, c.has_entities, c.entity_ids,
                        d.title AS document_title, d.url AS document_url,
                        s.id AS source_id, s.name AS source_name,
                        1 - (c.embedding <=> $2) AS similarity
                 FROM document_chunks c
                 JOIN crawled_documents d ON d.id = c.document_id
                 JOIN crawl_sources s ON s.id = d.source_id
                 WHERE s.organization_id = $1
                   AND c.embedding IS NOT NULL
                   AND ($4::text IS NULL OR s.id = $4)
                   AND ($5::text IS NULL OR c.language ILIKE $5 OR c.chunk_type <> 'code')
                   AND 1 - (c.embedding <=> $2) >= 0.5
                 ORDER BY similarity DESC
                 LIMIT $3",
                &[&organization_id, &embedding, &fetch_limit, &source_id, &language],
            )
            .await
            .map_err(|e| DocStoreError::Query(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| ChunkSimilarityRow {
                chunk: DocumentChunk {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    chunk_index: row.get::<_, i32>("chunk_index") as u32,
                    chunk_type: row
                        .get::<_, String>("chunk_type")
                        .parse()
                        .unwrap_or(ChunkType::Text),
                    content: row.get("content"),
                    context: row.get("context"),
                    token_count: row.get::<_, i32>("token_count") as u32,
                    start_char: row.get::<_, i32>("start_char") as u32,
                    end_char: row.get::<_, i32>("end_char") as u32,
                    heading_path: row.get("heading_path"),
                    language: row.get("language"),
                    embedding: row.get::<_, Option<Vector>>("embedding").map(|v| v.to_vec()),
                    is_complete: row.get("is_complete"),
                    has_entities: row.get("has_entities"),
                    entity_ids: row.get("entity_ids"),
                },
                document_id: row.get("document_id"),
                document_title: row.get("document_title"),
                document_url: row.get("document_url"),
                source_id: row.get("source_id"),
                source_name: row.get("source_name"),
                similarity: row.get::<_, f64>("similarity") as f32,
            })
            .collect())
    }

    /// Recompute a source's document/chunk counts from ground truth,
    /// rather than trusting whatever a partially-failed crawl last wrote.
    #[instrument(skip(self))]
    pub async fn count_documents_and_chunks(
        &self,
        organization_id: &str,
        source_id: &str,
    ) -> Result<(u32, u32), DocStoreError> {
        require_tenant(organization_id)?;
        let client = self.pool.get().await.map_err(|e| DocStoreError::Pool(e.to_string()))?;
        let row = client
            .query_one(
                "SELECT
                    (SELECT count(*) FROM crawled_documents d
                        JOIN crawl_sources s ON s.id = d.source_id
                        WHERE d.source_id = $1 AND s.organization_id = $2) AS document_count,
                    (SELECT count(*) FROM document_chunks c
                        JOIN crawled_documents d ON d.id = c.document_id
                        JOIN crawl_sources s ON s.id = d.source_id
                        WHERE d.source_id = $1 AND s.organization_id = $2) AS chunk_count",
                &[&source_id, &organization_id],
            )
            .await
            .map_err(|e| DocStoreError::Query(e.to_string()))?;
        Ok((
            row.get::<_, i64>("document_count") as u32,
            row.get::<_, i64>("chunk_count") as u32,
        ))
    }

    #[instrument(skip(self))]
    pub async fn touch_source_crawl_stats(
        &self,
        organization_id: &str,
        source_id: &str,
        document_count: u32,
        chunk_count: u32,
    ) -> Result<(), DocStoreError> {
        require_tenant(organization_id)?;
        let client = self.pool.get().await.map_err(|e| DocStoreError::Pool(e.to_string()))?;
        client
            .execute(
                "UPDATE crawl_sources SET document_count = $1, chunk_count = $2,
                    last_crawled_at = $3, updated_at = $3, status = 'completed'
                 WHERE id = $4 AND organization_id = $5",
                &[
                    &(document_count as i32),
                    &(chunk_count as i32),
                    &Utc::now(),
                    &source_id,
                    &organization_id,
                ],
            )
            .await
            .map_err(|e| DocStoreError::Query(e.to_string()))?;
        Ok(())
    }
}

fn require_tenant(organization_id: &str) -> Result<(), DocStoreError> {
    if organization_id.trim().is_empty() {
        return Err(DocStoreError::TenantMissing);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_tenant_rejects_blank() {
        assert!(matches!(require_tenant(""), Err(DocStoreError::TenantMissing)));
        assert!(require_tenant("org_1").is_ok());
    }
}
