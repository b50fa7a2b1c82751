//! Message and hook payload shapes exchanged with the LLM runtime
//! capability (§4.12, §6). These model the surface of the Claude Agent
//! SDK's message/hook types closely enough for checkpointing and hook
//! composition, without depending on any concrete SDK crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A single turn emitted by the runtime's query stream.
#[derive(Debug, Clone)]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        content: String,
        model: Option<String>,
    },
    Result {
        subtype: String,
        duration_ms: Option<u64>,
        total_cost_usd: Option<f64>,
        session_id: Option<String>,
        usage: Option<TokenUsage>,
    },
    /// Anything else: tool-use events, stream deltas, etc. Kept opaque.
    Event {
        name: String,
    },
}

/// Checkpoint-safe reduction of a `Message`, mirroring `_serialize_message`:
/// conversation history is kept for audit/context, never replayed on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageSummary {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    Result {
        subtype: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_cost_usd: Option<f64>,
    },
    Event {},
}

impl From<&Message> for MessageSummary {
    fn from(message: &Message) -> Self {
        match message {
            Message::User { content } => MessageSummary::User { content: content.clone() },
            Message::Assistant { content, model } => {
                MessageSummary::Assistant { content: content.clone(), model: model.clone() }
            }
            Message::Result { subtype, duration_ms, total_cost_usd, .. } => MessageSummary::Result {
                subtype: subtype.clone(),
                duration_ms: *duration_ms,
                total_cost_usd: *total_cost_usd,
            },
            Message::Event { .. } => MessageSummary::Event {},
        }
    }
}

/// Hook lifecycle events a runtime capability may invoke (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEventKind {
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    Stop,
}

/// Payload passed to a hook callback. Fields are populated depending on
/// which `HookEventKind` fired; unused fields are left `None`.
#[derive(Debug, Clone, Default)]
pub struct HookInput {
    pub prompt: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<JsonValue>,
    pub tool_use_id: Option<String>,
}

/// A hook's verdict: whether to let the turn proceed, and any context or
/// denial reason to surface back to the runtime.
#[derive(Debug, Clone)]
pub struct HookOutput {
    pub continue_: bool,
    pub additional_context: Option<String>,
    pub deny_reason: Option<String>,
}

impl Default for HookOutput {
    fn default() -> Self {
        Self { continue_: true, additional_context: None, deny_reason: None }
    }
}

impl HookOutput {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn allow_with_context(context: impl Into<String>) -> Self {
        Self { continue_: true, additional_context: Some(context.into()), deny_reason: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self { continue_: false, additional_context: None, deny_reason: Some(reason.into()) }
    }
}

pub type Metadata = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_summary_drops_result_fields_when_absent() {
        let message = Message::Result {
            subtype: "success".into(),
            duration_ms: None,
            total_cost_usd: None,
            session_id: Some("sess_1".into()),
            usage: None,
        };
        let summary = MessageSummary::from(&message);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["type"], "result");
        assert!(json.get("duration_ms").is_none());
    }

    #[test]
    fn event_message_summarizes_to_bare_tag() {
        let summary = MessageSummary::from(&Message::Event { name: "tool_use_delta".into() });
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["type"], "event");
    }
}
