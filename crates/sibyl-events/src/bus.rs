//! Tenant-scoped Redis pub/sub event bus (§4.6). Publishers never block
//! on subscribers: `publish` fires the `PUBLISH` command and returns, and
//! a failing or absent subscriber simply never sees the message.

use futures_util::StreamExt;
use redis::AsyncCommands;
use tracing::{instrument, warn};

use crate::errors::EventError;
use crate::event::Event;

fn channel_for(organization_id: &str) -> String {
    format!("sibyl:events:{organization_id}")
}

pub struct EventBus {
    client: redis::Client,
}

impl EventBus {
    pub fn new(redis_url: &str) -> Result<Self, EventError> {
        let client = redis::Client::open(redis_url).map_err(|e| EventError::Backend(e.to_string()))?;
        Ok(Self { client })
    }

    /// Best-effort publish. Errors are logged, not propagated — a dropped
    /// event must never fail the operation that triggered it.
    #[instrument(skip(self, event))]
    pub async fn publish(&self, event: &Event) {
        if event.organization_id.trim().is_empty() {
            warn!("dropping event with missing tenant id");
            return;
        }
        let channel = channel_for(&event.organization_id);
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err, "failed to serialize event, dropping");
                return;
            }
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            let Ok(mut conn) = client.get_multiplexed_async_connection().await else {
                warn!("event bus connection unavailable, dropping event");
                return;
            };
            if let Err(err) = conn.publish::<_, _, i64>(&channel, payload).await {
                warn!(error = %err, "failed to publish event, dropping");
            }
        });
    }

    /// Subscribe to a tenant's event channel. `client_id` identifies the
    /// caller for logging only; topic filtering happens downstream on the
    /// returned stream of decoded events.
    #[instrument(skip(self))]
    pub async fn subscribe(
        &self,
        organization_id: &str,
        client_id: &str,
    ) -> Result<impl futures_util::Stream<Item = Event>, EventError> {
        if organization_id.trim().is_empty() {
            return Err(EventError::TenantMissing);
        }
        let channel = channel_for(organization_id);
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| EventError::Backend(e.to_string()))?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| EventError::Backend(e.to_string()))?;
        tracing::info!(organization_id, client_id, "subscribed to event channel");

        Ok(pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_for_is_namespaced_per_tenant() {
        assert_eq!(channel_for("org_1"), "sibyl:events:org_1");
    }
}
