//! Job envelope and payload shapes (§4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    CrawlSource,
    SyncSource,
    SyncAll,
    CreateEntity,
    UpdateEntity,
    CreateLearningEpisode,
    LinkGraph,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub organization_id: String,
    pub job_type: JobType,
    pub payload: JsonValue,
    pub attempt: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(organization_id: impl Into<String>, job_type: JobType, payload: JsonValue, max_attempts: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            job_type,
            payload,
            attempt: 0,
            max_attempts,
            created_at: Utc::now(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Running crawl stats, threaded through `onProgress` callbacks and the
/// final `crawl_complete` event (§4.5, §4.7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub documents_crawled: u32,
    pub documents_stored: u32,
    pub chunks_created: u32,
    pub embeddings_generated: u32,
    pub errors: u32,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn is_exhausted_at_max_attempts() {
        let mut job = Job::new("org_1", JobType::CrawlSource, json!({}), 3);
        job.attempt = 3;
        assert!(job.is_exhausted());
        job.attempt = 2;
        assert!(!job.is_exhausted());
    }

    #[test]
    fn job_type_round_trips_snake_case() {
        let json = serde_json::to_string(&JobType::CreateLearningEpisode).unwrap();
        assert_eq!(json, "\"create_learning_episode\"");
    }
}
