//! Document-store row shapes (§3, §4.3). These back the chunked-document
//! column alongside the property graph; they are plain rows, not graph
//! entities, but share the tenant-scoping discipline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CrawlStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceType {
    #[default]
    Web,
    LocalFiles,
    Git,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSource {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default = "default_crawl_depth")]
    pub crawl_depth: u32,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub status: CrawlStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub document_count: u32,
    #[serde(default)]
    pub chunk_count: u32,
    #[serde(default)]
    pub last_crawled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub favicon_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_crawl_depth() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledDocument {
    pub id: String,
    pub source_id: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub headings: Vec<String>,
    #[serde(default)]
    pub section_path: Vec<String>,
    #[serde(default)]
    pub word_count: u32,
    #[serde(default)]
    pub has_code: bool,
    #[serde(default)]
    pub language: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChunkType {
    Text,
    Heading,
    Code,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub chunk_type: ChunkType,
    pub content: String,
    /// Contextual-retrieval prefix, embedded alongside `content` (§4.7).
    #[serde(default)]
    pub context: Option<String>,
    pub token_count: u32,
    pub start_char: u32,
    pub end_char: u32,
    #[serde(default)]
    pub heading_path: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default = "default_true")]
    pub is_complete: bool,
    #[serde(default)]
    pub has_entities: bool,
    #[serde(default)]
    pub entity_ids: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_type_round_trips() {
        let json = serde_json::to_string(&ChunkType::Code).unwrap();
        assert_eq!(json, "\"code\"");
        let back: ChunkType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ChunkType::Code);
    }

    #[test]
    fn default_crawl_depth_is_two() {
        assert_eq!(default_crawl_depth(), 2);
    }
}
