//! Hook composition and Sibyl's own hooks: context injection, tool-use
//! tracking, and workflow-completion reminders (§6, §9 Design Notes).
//!
//! Hooks are modeled as values implementing a small callback trait so
//! several of them (user-provided, context-injection, approval,
//! tool-tracking) can be composed per event in declared order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use sibyl_retrieval::{HybridRetrievalEngine, SearchFilters};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::errors::AgentError;
use crate::types::{HookEventKind, HookInput, HookOutput};

#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(&self, input: &HookInput) -> Result<HookOutput, AgentError>;
}

pub type HookRegistry = HashMap<HookEventKind, Vec<Arc<dyn Hook>>>;

/// Runs every hook registered for `event` in order, stopping at the first
/// one that denies. Matches the runtime's own matcher-list semantics: a
/// hook only ever gets to veto, never to rewrite what a later hook sees.
pub async fn run_hooks(
    registry: &HookRegistry,
    event: HookEventKind,
    input: &HookInput,
) -> Result<HookOutput, AgentError> {
    let mut context_parts = Vec::new();
    if let Some(hooks) = registry.get(&event) {
        for hook in hooks {
            let output = hook.call(input).await?;
            if !output.continue_ {
                return Ok(output);
            }
            if let Some(context) = output.additional_context {
                context_parts.push(context);
            }
        }
    }
    if context_parts.is_empty() {
        Ok(HookOutput::allow())
    } else {
        Ok(HookOutput::allow_with_context(context_parts.join("\n\n")))
    }
}

/// Merges a user's own hook configuration with Sibyl's programmatic hooks.
/// User hooks run first (they configured them); Sibyl's hooks run after,
/// preserving user expectations while layering in Sibyl functionality.
pub fn compose_hooks(user_hooks: HookRegistry, sibyl_hooks: HookRegistry) -> HookRegistry {
    let mut merged: HookRegistry = HashMap::new();
    for (event, hooks) in user_hooks {
        merged.entry(event).or_default().extend(hooks);
    }
    for (event, hooks) in sibyl_hooks {
        merged.entry(event).or_default().extend(hooks);
    }
    merged
}

/// Tracks whether an agent actually engaged with Sibyl during a run, so a
/// Stop-hook reminder can fire only for substantive work that skipped the
/// search -> work -> capture workflow. Thresholds are configuration values,
/// not fixed constants, so callers can tune what counts as "substantive."
#[derive(Debug, Clone)]
pub struct WorkflowTracker {
    pub min_tool_calls_for_workflow: usize,
    pub substantive_tools: HashSet<String>,
    pub searched_sibyl: bool,
    pub updated_task: bool,
    pub captured_learning: bool,
    pub received_context: bool,
    pub injected_context: Option<String>,
    pub sibyl_tool_calls: Vec<String>,
    pub all_tool_calls: Vec<String>,
    pub agent_stopped: bool,
}

impl Default for WorkflowTracker {
    fn default() -> Self {
        Self {
            min_tool_calls_for_workflow: 5,
            substantive_tools: ["Write", "Edit", "MultiEdit", "Bash"].iter().map(|s| s.to_string()).collect(),
            searched_sibyl: false,
            updated_task: false,
            captured_learning: false,
            received_context: false,
            injected_context: None,
            sibyl_tool_calls: Vec::new(),
            all_tool_calls: Vec::new(),
            agent_stopped: false,
        }
    }
}

const SIBYL_TOOL_PATTERNS: &[&str] = &["sibyl", "search", "explore", "add_knowledge", "manage_task"];

impl WorkflowTracker {
    pub fn record_tool_use(&mut self, tool_name: &str, tool_input: Option<&serde_json::Value>) {
        self.all_tool_calls.push(tool_name.to_string());

        let tool_lower = tool_name.to_lowercase();
        let is_sibyl_tool = SIBYL_TOOL_PATTERNS.iter().any(|p| tool_lower.contains(p));
        if !is_sibyl_tool {
            return;
        }
        self.sibyl_tool_calls.push(tool_name.to_string());

        if tool_lower.contains("search") || tool_lower.contains("explore") {
            self.searched_sibyl = true;
        } else if tool_lower.contains("task") {
            self.updated_task = true;
        } else if tool_lower.contains("add") || tool_lower.contains("create") {
            let mentions_learning = tool_input.map(|v| v.to_string().to_lowercase().contains("learning")).unwrap_or(false);
            if mentions_learning {
                self.captured_learning = true;
            }
        }
    }

    fn is_substantive_work(&self) -> bool {
        if self.all_tool_calls.len() < self.min_tool_calls_for_workflow {
            return false;
        }
        self.all_tool_calls
            .iter()
            .any(|tool| self.substantive_tools.iter().any(|sub| tool.contains(sub.as_str())))
    }

    /// True if the workflow is complete, OR the session wasn't substantive
    /// enough to need one in the first place.
    pub fn is_workflow_complete(&self) -> bool {
        if !self.is_substantive_work() {
            return true;
        }
        let has_context = self.searched_sibyl || self.received_context;
        has_context || !self.sibyl_tool_calls.is_empty()
    }

    pub fn should_remind(&self) -> bool {
        self.is_substantive_work() && !self.is_workflow_complete()
    }

    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "searched_sibyl": self.searched_sibyl,
            "updated_task": self.updated_task,
            "captured_learning": self.captured_learning,
            "received_context": self.received_context,
            "sibyl_tool_calls": self.sibyl_tool_calls,
            "total_tool_calls": self.all_tool_calls.len(),
            "is_substantive": self.is_substantive_work(),
            "agent_stopped": self.agent_stopped,
            "workflow_complete": self.is_workflow_complete(),
            "should_remind": self.should_remind(),
        })
    }
}

const MIN_PROMPT_LENGTH: usize = 25;
const MIN_SEARCH_TERM_LENGTH: usize = 8;

fn stop_words() -> &'static HashSet<&'static str> {
    static WORDS: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "the", "and", "for", "with", "this", "that", "from", "have", "will", "would", "could", "should", "please",
            "need", "want", "what", "when", "where", "which", "their", "there",
        ]
        .into_iter()
        .collect()
    })
}

fn extract_search_terms(prompt: &str) -> String {
    let word_re = Regex::new(r"\b[a-zA-Z_][a-zA-Z0-9_]*\b").expect("static regex");
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for m in word_re.find_iter(&prompt.to_lowercase()) {
        let w = m.as_str();
        if w.len() > 3 && !stop_words().contains(w) && !w.starts_with('_') && seen.insert(w.to_string()) {
            unique.push(w.to_string());
            if unique.len() == 5 {
                break;
            }
        }
    }
    unique.join(" ")
}

fn format_search_results(hits: &[sibyl_retrieval::SearchHit]) -> String {
    let mut lines = Vec::new();
    for hit in hits.iter().take(3) {
        let type_label = hit.entity_type.as_deref().map(|t| format!(" ({t})")).unwrap_or_default();
        lines.push(format!("- **{}**{type_label}", hit.name));
        if let Some(content) = &hit.content {
            let truncated: String = content.chars().take(200).collect();
            if !truncated.is_empty() {
                lines.push(format!("  {truncated}"));
            }
        }
    }
    lines.join("\n")
}

/// `UserPromptSubmit` hook: searches the knowledge graph for terms related
/// to the prompt and injects a short context block when something relevant
/// turns up. Mirrors `SibylContextService.search_context`.
pub struct ContextInjectionHook {
    retrieval: Arc<HybridRetrievalEngine>,
    organization_id: String,
    tracker: Arc<Mutex<WorkflowTracker>>,
}

impl ContextInjectionHook {
    pub fn new(
        retrieval: Arc<HybridRetrievalEngine>,
        organization_id: impl Into<String>,
        tracker: Arc<Mutex<WorkflowTracker>>,
    ) -> Self {
        Self { retrieval, organization_id: organization_id.into(), tracker }
    }

    #[instrument(skip(self))]
    async fn search_context(&self, prompt: &str) -> Option<String> {
        if prompt.len() < MIN_PROMPT_LENGTH || prompt.trim_start().starts_with('/') {
            return None;
        }
        let terms = extract_search_terms(prompt);
        if terms.len() < MIN_SEARCH_TERM_LENGTH {
            return None;
        }

        let filters = SearchFilters::default();
        let hits = match self.retrieval.search(&self.organization_id, &terms, &filters, 3, 0).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "sibyl context search failed");
                return None;
            }
        };
        if hits.is_empty() {
            return None;
        }
        let formatted = format_search_results(&hits);
        if formatted.is_empty() {
            None
        } else {
            Some(format!("**Sibyl Context:**\n{formatted}"))
        }
    }
}

#[async_trait]
impl Hook for ContextInjectionHook {
    async fn call(&self, input: &HookInput) -> Result<HookOutput, AgentError> {
        let prompt = input.prompt.as_deref().unwrap_or_default();
        match self.search_context(prompt).await {
            Some(context) => {
                debug!(prompt_preview = %prompt.chars().take(50).collect::<String>(), "injecting sibyl context");
                let mut tracker = self.tracker.lock().await;
                tracker.received_context = true;
                tracker.injected_context = Some(context.clone());
                Ok(HookOutput::allow_with_context(context))
            }
            None => Ok(HookOutput::allow()),
        }
    }
}

/// `PostToolUse` hook: records every tool call into the shared tracker.
pub struct ToolUseTrackingHook {
    tracker: Arc<Mutex<WorkflowTracker>>,
}

impl ToolUseTrackingHook {
    pub fn new(tracker: Arc<Mutex<WorkflowTracker>>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Hook for ToolUseTrackingHook {
    async fn call(&self, input: &HookInput) -> Result<HookOutput, AgentError> {
        if let Some(tool_name) = &input.tool_name {
            let mut tracker = self.tracker.lock().await;
            tracker.record_tool_use(tool_name, input.tool_input.as_ref());
        }
        Ok(HookOutput::allow())
    }
}

/// `Stop` hook: marks the tracker stopped and logs the workflow summary.
/// Always allows the turn to end — follow-up reminder logic is driven
/// externally by `WorkflowTracker::should_remind`.
pub struct WorkflowStopHook {
    tracker: Arc<Mutex<WorkflowTracker>>,
}

impl WorkflowStopHook {
    pub fn new(tracker: Arc<Mutex<WorkflowTracker>>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Hook for WorkflowStopHook {
    async fn call(&self, _input: &HookInput) -> Result<HookOutput, AgentError> {
        let mut tracker = self.tracker.lock().await;
        tracker.agent_stopped = true;
        info!(summary = %tracker.summary(), "agent stopped");
        Ok(HookOutput::allow())
    }
}

/// Builds Sibyl's own context-injection + tool-tracking + stop hooks,
/// sharing one `WorkflowTracker` across all three. Approval hooks are
/// layered in separately by `approvals::ApprovalService::hook_registry`.
pub fn sibyl_hooks(
    retrieval: Arc<HybridRetrievalEngine>,
    organization_id: impl Into<String>,
) -> (HookRegistry, Arc<Mutex<WorkflowTracker>>) {
    let tracker = Arc::new(Mutex::new(WorkflowTracker::default()));
    let mut registry: HookRegistry = HashMap::new();
    registry
        .entry(HookEventKind::UserPromptSubmit)
        .or_default()
        .push(Arc::new(ContextInjectionHook::new(retrieval, organization_id, tracker.clone())));
    registry
        .entry(HookEventKind::PostToolUse)
        .or_default()
        .push(Arc::new(ToolUseTrackingHook::new(tracker.clone())));
    registry.entry(HookEventKind::Stop).or_default().push(Arc::new(WorkflowStopHook::new(tracker.clone())));
    (registry, tracker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_is_not_substantive_below_min_tool_calls() {
        let mut tracker = WorkflowTracker::default();
        for _ in 0..4 {
            tracker.record_tool_use("Write", None);
        }
        assert!(!tracker.should_remind());
        assert!(tracker.is_workflow_complete());
    }

    #[test]
    fn tracker_reminds_after_substantive_work_without_sibyl_engagement() {
        let mut tracker = WorkflowTracker::default();
        for _ in 0..5 {
            tracker.record_tool_use("Edit", None);
        }
        assert!(tracker.should_remind());
        assert!(!tracker.is_workflow_complete());
    }

    #[test]
    fn tracker_is_complete_once_sibyl_search_tool_used() {
        let mut tracker = WorkflowTracker::default();
        for _ in 0..5 {
            tracker.record_tool_use("Write", None);
        }
        tracker.record_tool_use("sibyl_search", None);
        assert!(tracker.is_workflow_complete());
        assert!(!tracker.should_remind());
    }

    #[test]
    fn extract_search_terms_drops_stop_words_and_short_tokens() {
        let terms = extract_search_terms("Please help me understand the authentication middleware refactor");
        assert!(terms.contains("understand"));
        assert!(terms.contains("authentication"));
        assert!(!terms.contains("please"));
    }

    #[test]
    fn compose_hooks_preserves_user_first_then_sibyl_order() {
        struct Noop;
        #[async_trait]
        impl Hook for Noop {
            async fn call(&self, _input: &HookInput) -> Result<HookOutput, AgentError> {
                Ok(HookOutput::allow())
            }
        }

        let mut user: HookRegistry = HashMap::new();
        user.entry(HookEventKind::Stop).or_default().push(Arc::new(Noop) as Arc<dyn Hook>);
        let mut sibyl: HookRegistry = HashMap::new();
        sibyl.entry(HookEventKind::Stop).or_default().push(Arc::new(Noop) as Arc<dyn Hook>);

        let merged = compose_hooks(user, sibyl);
        assert_eq!(merged.get(&HookEventKind::Stop).unwrap().len(), 2);
    }
}
