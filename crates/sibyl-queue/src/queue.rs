//! Durable at-least-once job queue over a Redis stream + consumer group.
//! Enqueue is `XADD`; workers claim via `XREADGROUP` and must `ack` or the
//! job becomes claimable again by another worker after its visibility
//! timeout, matching the "durable, at-least-once, retried with backoff up
//! to a bounded attempt count" contract (§4.5).

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sibyl_common::backoff::{BackoffConfig, retry_with_backoff};
use tracing::{info, instrument, warn};

use crate::errors::QueueError;
use crate::job::Job;

const STREAM_KEY: &str = "sibyl:jobs";
const GROUP_NAME: &str = "sibyl-workers";
const DEAD_LETTER_KEY: &str = "sibyl:jobs:dead";

pub struct JobQueue {
    conn: ConnectionManager,
    backoff: BackoffConfig,
}

/// A job claimed off the stream, carrying the stream entry id needed to
/// ack or requeue it.
pub struct ClaimedJob {
    pub stream_id: String,
    pub job: Job,
}

impl JobQueue {
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(|e| QueueError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let queue = Self {
            conn,
            backoff: BackoffConfig::default(),
        };
        queue.ensure_group().await?;
        Ok(queue)
    }

    async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(STREAM_KEY)
            .arg(GROUP_NAME)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        if let Err(err) = result {
            if !err.to_string().contains("BUSYGROUP") {
                return Err(QueueError::Backend(err.to_string()));
            }
        }
        Ok(())
    }

    #[instrument(skip(self, job))]
    pub async fn enqueue(&self, job: &Job) -> Result<String, QueueError> {
        if job.organization_id.trim().is_empty() {
            return Err(QueueError::TenantMissing);
        }
        let payload = serde_json::to_string(job).map_err(|e| QueueError::Backend(e.to_string()))?;
        let conn = self.conn.clone();
        let backoff = self.backoff;
        let stream_id: String = retry_with_backoff(
            backoff,
            || {
                let mut conn = conn.clone();
                let payload = payload.clone();
                async move {
                    conn.xadd::<_, _, _, _, String>(STREAM_KEY, "*", &[("job", payload)])
                        .await
                        .map_err(|e| QueueError::Backend(e.to_string()))
                }
            },
            |_| true,
        )
        .await?;
        info!(job_id = %job.id, job_type = %job.job_type, stream_id, "enqueued job");
        Ok(stream_id)
    }

    /// Claim up to `count` pending jobs, blocking up to `block` for new
    /// entries if none are immediately available.
    #[instrument(skip(self))]
    pub async fn claim(&self, consumer: &str, count: usize, block: Duration) -> Result<Vec<ClaimedJob>, QueueError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(GROUP_NAME)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as i64)
            .arg("STREAMS")
            .arg(STREAM_KEY)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        let mut claimed = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let Some(redis::Value::BulkString(raw)) = entry.map.get("job") else {
                    continue;
                };
                match serde_json::from_slice::<Job>(raw) {
                    Ok(job) => claimed.push(ClaimedJob {
                        stream_id: entry.id.clone(),
                        job,
                    }),
                    Err(err) => warn!(stream_id = entry.id, error = %err, "dropping malformed job entry"),
                }
            }
        }
        Ok(claimed)
    }

    #[instrument(skip(self))]
    pub async fn ack(&self, stream_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.xack::<_, _, _, ()>(STREAM_KEY, GROUP_NAME, &[stream_id])
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Requeue a failed job with an incremented attempt counter, or move
    /// it to the dead-letter list once its attempt budget is exhausted.
    #[instrument(skip(self, job))]
    pub async fn retry_or_dead_letter(
        &self,
        stream_id: &str,
        mut job: Job,
        last_error: &str,
    ) -> Result<(), QueueError> {
        self.ack(stream_id).await?;
        job.attempt += 1;
        if job.is_exhausted() {
            let mut conn = self.conn.clone();
            let payload = serde_json::json!({"job": job, "last_error": last_error});
            conn.rpush::<_, _, ()>(DEAD_LETTER_KEY, payload.to_string())
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
            warn!(job_id = %job.id, "job moved to dead letter queue");
            return Err(QueueError::Exhausted {
                job_id: job.id,
                max_attempts: job.max_attempts,
                last_error: last_error.to_string(),
            });
        }
        self.enqueue(&job).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobType;
    use serde_json::json;

    #[test]
    fn job_exhaustion_gate_matches_attempt_counter() {
        let mut job = Job::new("org_1", JobType::CrawlSource, json!({}), 2);
        assert!(!job.is_exhausted());
        job.attempt = 2;
        assert!(job.is_exhausted());
    }
}
