//! LLM runtime capability (§6): the seam between this crate's agent
//! lifecycle management and whatever concrete SDK drives the model. No
//! concrete Claude Agent SDK crate is available here, so callers supply a
//! capability trait object, mirroring `sibyl_ingest::EmbeddingCapability`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::errors::AgentError;
use crate::hooks::HookRegistry;
use crate::types::{Message, TokenUsage};

#[derive(Clone, Default)]
pub struct RuntimeOptions {
    pub cwd: Option<PathBuf>,
    pub system_prompt: String,
    pub hooks: HookRegistry,
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Runs a prompt to completion (or cancellation) and streams back every
    /// message the runtime produces, in emission order.
    async fn query(
        &self,
        prompt: &str,
        options: &RuntimeOptions,
    ) -> Result<BoxStream<'static, Result<Message, AgentError>>, AgentError>;
}

/// Deterministic runtime for tests: emits a fixed three-message sequence
/// (user echo, assistant reply, result) without touching any network or
/// subprocess boundary.
pub struct MockAgentRuntime {
    pub model: String,
    pub session_id: String,
    pub cost_usd: f64,
}

impl Default for MockAgentRuntime {
    fn default() -> Self {
        Self { model: "mock-model".into(), session_id: "sess_mock".into(), cost_usd: 0.01 }
    }
}

#[async_trait]
impl AgentRuntime for MockAgentRuntime {
    async fn query(
        &self,
        prompt: &str,
        _options: &RuntimeOptions,
    ) -> Result<BoxStream<'static, Result<Message, AgentError>>, AgentError> {
        let messages = vec![
            Ok(Message::User { content: prompt.to_string() }),
            Ok(Message::Assistant {
                content: format!("acknowledged: {prompt}"),
                model: Some(self.model.clone()),
            }),
            Ok(Message::Result {
                subtype: "success".into(),
                duration_ms: Some(1),
                total_cost_usd: Some(self.cost_usd),
                session_id: Some(self.session_id.clone()),
                usage: Some(TokenUsage { input_tokens: 10, output_tokens: 20 }),
            }),
        ];
        Ok(stream::iter(messages).boxed())
    }
}

pub fn mock_runtime() -> Arc<dyn AgentRuntime> {
    Arc::new(MockAgentRuntime::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_runtime_emits_user_assistant_result_in_order() {
        let runtime = MockAgentRuntime::default();
        let options = RuntimeOptions::default();
        let mut stream = runtime.query("hello", &options).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, Message::User { .. }));
        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(second, Message::Assistant { .. }));
        let third = stream.next().await.unwrap().unwrap();
        assert!(matches!(third, Message::Result { .. }));
        assert!(stream.next().await.is_none());
    }
}
