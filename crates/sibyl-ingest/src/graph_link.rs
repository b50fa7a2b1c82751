//! Links chunk-referenced entities to their source document (§4.7 "Graph
//! Linker"). Entity extraction itself is an LLM-capability concern out of
//! scope here; this stage only writes `DOCUMENTED_IN` edges for entity ids
//! a chunk already names, and only once the entity is confirmed to exist —
//! unresolved references are dropped, never invented.

use serde_json::json;
use sibyl_common::document::DocumentChunk;
use sibyl_graph::GraphClient;
use tracing::{instrument, warn};

use crate::errors::IngestError;

#[instrument(skip(graph, chunks))]
pub async fn link_chunks_to_document(
    graph: &GraphClient,
    organization_id: &str,
    document_id: &str,
    chunks: &[DocumentChunk],
) -> Result<u32, IngestError> {
    let mut linked = 0u32;
    let mut entity_ids: Vec<&str> = chunks.iter().flat_map(|c| c.entity_ids.iter().map(String::as_str)).collect();
    entity_ids.sort_unstable();
    entity_ids.dedup();

    for entity_id in entity_ids {
        let exists = graph
            .execute_read(
                organization_id,
                &["id"],
                "MATCH (e:Entity {id: $entity_id}) RETURN e.id AS id",
                &[("entity_id", json!(entity_id))],
            )
            .await
            .map_err(|e| IngestError::Graph(e.to_string()))?;

        if exists.is_empty() {
            warn!(entity_id, document_id, "deferring DOCUMENTED_IN edge: entity not found");
            continue;
        }

        graph
            .execute_write(
                organization_id,
                &[],
                "MATCH (e:Entity {id: $entity_id}) \
                 MERGE (d:Document {id: $document_id}) \
                 MERGE (e)-[:DOCUMENTED_IN]->(d)",
                &[("entity_id", json!(entity_id)), ("document_id", json!(document_id))],
            )
            .await
            .map_err(|e| IngestError::Graph(e.to_string()))?;
        linked += 1;
    }

    Ok(linked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibyl_common::document::ChunkType;

    fn chunk(entity_ids: Vec<&str>) -> DocumentChunk {
        DocumentChunk {
            id: "chunk_1".into(),
            document_id: "doc_1".into(),
            chunk_index: 0,
            chunk_type: ChunkType::Text,
            content: "x".into(),
            context: None,
            token_count: 1,
            start_char: 0,
            end_char: 1,
            heading_path: vec![],
            language: None,
            embedding: None,
            is_complete: true,
            has_entities: !entity_ids.is_empty(),
            entity_ids: entity_ids.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn dedups_entity_ids_across_chunks() {
        let chunks = vec![chunk(vec!["e_1", "e_2"]), chunk(vec!["e_1"])];
        let mut ids: Vec<&str> = chunks.iter().flat_map(|c| c.entity_ids.iter().map(String::as_str)).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids, vec!["e_1", "e_2"]);
    }
}
