//! Shared result shapes for the hybrid retrieval engine (§4.8).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResultOrigin {
    Graph,
    Document,
}

/// One fused, filtered, paginated search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    pub entity_type: Option<String>,
    pub score: f32,
    pub result_origin: ResultOrigin,
    /// Which ranked lists produced this id and at what rank, for
    /// debuggability (§4.8 "merged results preserve a metadata trace").
    pub list_trace: Vec<(String, usize)>,
    pub content: Option<String>,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub entity_types: Vec<String>,
    pub languages: Vec<String>,
    pub category_substring: Option<String>,
    pub status_in: Vec<String>,
    pub accessible_projects: Option<Vec<String>>,
    pub assignee: Option<String>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub source_id: Option<String>,
    pub include_content: bool,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            entity_types: Vec::new(),
            languages: Vec::new(),
            category_substring: None,
            status_in: Vec::new(),
            accessible_projects: None,
            assignee: None,
            since: None,
            source_id: None,
            include_content: true,
        }
    }
}
