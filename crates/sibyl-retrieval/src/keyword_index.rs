//! In-memory BM25 keyword search over entity `name + description`
//! (§4.8 graph-stream step 4), built fresh per search call from whatever
//! rows the graph stream already fetched — there is no standing index to
//! keep consistent with writes, matching the spec's "in-memory/disk
//! inverted index" wording at the in-memory end.

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexWriter, TantivyDocument};
use tracing::warn;

use crate::errors::RetrievalError;

pub struct KeywordIndex {
    index: Index,
    id_field: tantivy::schema::Field,
    text_field: tantivy::schema::Field,
}

impl KeywordIndex {
    /// `entities` is `(id, name, description)`.
    pub fn build(entities: &[(String, String, String)]) -> Result<Self, RetrievalError> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer: IndexWriter = index
            .writer(15_000_000)
            .map_err(|e| RetrievalError::Index(e.to_string()))?;

        for (id, name, description) in entities {
            let combined = format!("{name} {description}");
            writer
                .add_document(doc!(id_field => id.as_str(), text_field => combined))
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
        }
        writer.commit().map_err(|e| RetrievalError::Index(e.to_string()))?;

        Ok(Self { index, id_field, text_field })
    }

    /// Ranked `(entity_id, bm25_score)` pairs, best first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>, RetrievalError> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let reader = self
            .index
            .reader()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;
        let searcher = reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let parsed = match parser.parse_query(query) {
            Ok(q) => q,
            Err(err) => {
                warn!(query, error = %err, "bm25 query parse failed, skipping keyword stream");
                return Ok(Vec::new());
            }
        };

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| RetrievalError::Index(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
            if let Some(id) = retrieved
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
            {
                results.push((id.to_string(), score));
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entities() -> Vec<(String, String, String)> {
        vec![
            ("e1".into(), "Authentication Service".into(), "Handles login and tokens".into()),
            ("e2".into(), "Billing Worker".into(), "Processes invoices".into()),
            ("e3".into(), "Auth Middleware".into(), "Validates session tokens".into()),
        ]
    }

    #[test]
    fn search_ranks_matching_entities_above_unrelated_ones() {
        let index = KeywordIndex::build(&sample_entities()).unwrap();
        let results = index.search("authentication tokens", 10).unwrap();
        assert!(!results.is_empty());
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert!(ids.contains(&"e1") || ids.contains(&"e3"));
    }

    #[test]
    fn empty_query_returns_no_results() {
        let index = KeywordIndex::build(&sample_entities()).unwrap();
        assert!(index.search("", 10).unwrap().is_empty());
    }
}
