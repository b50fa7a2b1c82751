//! Canonical event payloads published across the crawl and entity-mutation
//! lifecycles (§4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    CrawlStarted,
    CrawlProgress,
    CrawlComplete,
    CrawlSyncComplete,
    EntityCreated,
    EntityUpdated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub organization_id: String,
    pub kind: EventKind,
    pub payload: JsonValue,
    pub published_at: DateTime<Utc>,
}

impl Event {
    pub fn new(organization_id: impl Into<String>, kind: EventKind, payload: JsonValue) -> Self {
        Self {
            organization_id: organization_id.into(),
            kind,
            payload,
            published_at: Utc::now(),
        }
    }

    pub fn crawl_started(organization_id: impl Into<String>, source_id: &str, source_name: &str, max_pages: u32) -> Self {
        Self::new(
            organization_id,
            EventKind::CrawlStarted,
            serde_json::json!({
                "source_id": source_id,
                "source_name": source_name,
                "max_pages": max_pages,
            }),
        )
    }

    pub fn crawl_progress(
        organization_id: impl Into<String>,
        source_id: &str,
        documents: u32,
        chunks: u32,
        delta: u32,
        errors: u32,
    ) -> Self {
        Self::new(
            organization_id,
            EventKind::CrawlProgress,
            serde_json::json!({
                "source_id": source_id,
                "counts": {"documents": documents, "chunks": chunks},
                "delta": delta,
                "errors": errors,
            }),
        )
    }

    pub fn crawl_complete(
        organization_id: impl Into<String>,
        source_id: &str,
        documents: u32,
        chunks: u32,
        duration_ms: u64,
        error: Option<&str>,
    ) -> Self {
        Self::new(
            organization_id,
            EventKind::CrawlComplete,
            serde_json::json!({
                "source_id": source_id,
                "final_counts": {"documents": documents, "chunks": chunks},
                "duration_ms": duration_ms,
                "error": error,
            }),
        )
    }

    pub fn crawl_sync_complete(
        organization_id: impl Into<String>,
        source_id: &str,
        documents: u32,
        chunks: u32,
    ) -> Self {
        Self::new(
            organization_id,
            EventKind::CrawlSyncComplete,
            serde_json::json!({
                "source_id": source_id,
                "final_counts": {"documents": documents, "chunks": chunks},
            }),
        )
    }

    pub fn entity_created(organization_id: impl Into<String>, id: &str, entity_type: &str, name: &str, derived_from: Option<&str>) -> Self {
        Self::new(
            organization_id,
            EventKind::EntityCreated,
            serde_json::json!({
                "id": id,
                "entity_type": entity_type,
                "name": name,
                "derived_from": derived_from,
            }),
        )
    }

    pub fn entity_updated(organization_id: impl Into<String>, id: &str, entity_type: &str, changed_fields: &[&str]) -> Self {
        Self::new(
            organization_id,
            EventKind::EntityUpdated,
            serde_json::json!({
                "id": id,
                "entity_type": entity_type,
                "changed_fields": changed_fields,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crawl_started_carries_expected_fields() {
        let event = Event::crawl_started("org_1", "src_1", "Docs", 50);
        assert_eq!(event.kind, EventKind::CrawlStarted);
        assert_eq!(event.payload["source_name"], "Docs");
        assert_eq!(event.payload["max_pages"], 50);
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&EventKind::CrawlSyncComplete).unwrap(), "\"crawl_sync_complete\"");
    }
}
