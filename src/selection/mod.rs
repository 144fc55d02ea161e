//! Tool selection.
//!
//! [`SmartToolSelector::select_tool`] turns a processed message into a
//! [`ToolSelection`]: it scores every enabled tool compatible with the intent,
//! fills in parameters the message left out, validates the result and
//! adjusts the confidence. Execution outcomes fed back through
//! [`SmartToolSelector::record_tool_execution_result`] shape later scores.

pub mod capability;
pub mod performance;

pub use capability::{default_capabilities, ToolCapability};
pub use performance::{ErrorCategory, ToolPerformance};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SelectionConfig;
use crate::nlp::context::ConversationContext;
use crate::nlp::inference::{ensure_md, infer_content, infer_file_path, infer_query, infer_task, infer_title};
use crate::nlp::types::{EnhancedProcessingResult, Intent, Params};
use crate::profile::UserProfileStore;
use crate::vault::Vault;

const INTENT_WEIGHT: f64 = 0.4;
const PARAMETER_WEIGHT: f64 = 0.3;
const HISTORY_WEIGHT: f64 = 0.2;
const CONTEXT_WEIGHT: f64 = 0.1;
const PREFERENCE_WEIGHT: f64 = 0.1;
const RECENCY_BONUS: f64 = 0.05;
/// Success rate assumed for a tool that has never run.
const UNTRIED_SUCCESS_RATE: f64 = 0.1;
const FALLBACK_CONFIDENCE: f64 = 0.1;
const MAX_ALTERNATIVES: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSelection {
    pub selected_tool: String,
    pub confidence: f64,
    /// Final parameter set for the selected tool.
    pub parameters: Params,
    /// The subset of `parameters` the selector filled in itself.
    pub inferred_parameters: Params,
    /// Runners-up, best first.
    pub alternative_tools: Vec<(String, f64)>,
    pub selection_reason: String,
    pub validation_errors: Vec<String>,
}

impl ToolSelection {
    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }
}

pub struct SmartToolSelector {
    capabilities: Vec<ToolCapability>,
    disabled: HashSet<String>,
    performance: HashMap<String, ToolPerformance>,
    /// intent → tool → successful executions.
    context_patterns: HashMap<Intent, BTreeMap<String, u64>>,
    profiles: Arc<dyn UserProfileStore>,
    vault: Option<Arc<dyn Vault>>,
    vault_files: Vec<String>,
    recency_window: chrono::Duration,
}

impl SmartToolSelector {
    /// A selector over the standard capabilities of the named tools.
    pub fn new(available_tools: &[&str], config: &SelectionConfig, profiles: Arc<dyn UserProfileStore>) -> Self {
        let capabilities = default_capabilities()
            .into_iter()
            .filter(|c| available_tools.contains(&c.tool_name.as_str()))
            .collect();
        Self::with_capabilities(capabilities, config, profiles)
    }

    pub fn with_capabilities(
        capabilities: Vec<ToolCapability>,
        config: &SelectionConfig,
        profiles: Arc<dyn UserProfileStore>,
    ) -> Self {
        Self {
            capabilities,
            disabled: HashSet::new(),
            performance: HashMap::new(),
            context_patterns: HashMap::new(),
            profiles,
            vault: None,
            vault_files: Vec::new(),
            recency_window: chrono::Duration::seconds(config.recency_window_secs),
        }
    }

    /// Vault used to read note text for AI-processing content inference.
    pub fn with_vault(mut self, vault: Arc<dyn Vault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn set_vault_files(&mut self, files: Vec<String>) {
        self.vault_files = files;
    }

    pub fn capabilities(&self) -> &[ToolCapability] {
        &self.capabilities
    }

    /// Returns false for unknown tools.
    pub fn set_tool_enabled(&mut self, tool: &str, enabled: bool) -> bool {
        if !self.capabilities.iter().any(|c| c.tool_name == tool) {
            return false;
        }
        if enabled {
            self.disabled.remove(tool);
        } else {
            self.disabled.insert(tool.to_string());
        }
        true
    }

    pub fn is_enabled(&self, tool: &str) -> bool {
        !self.disabled.contains(tool) && self.capabilities.iter().any(|c| c.tool_name == tool)
    }

    pub fn get_tool_statistics(&self) -> BTreeMap<String, ToolPerformance> {
        self.capabilities
            .iter()
            .map(|c| {
                let perf = self.performance.get(&c.tool_name).cloned().unwrap_or_default();
                (c.tool_name.clone(), perf)
            })
            .collect()
    }

    /// Enabled tools compatible with `intent`, in registry order.
    pub fn candidates(&self, intent: Intent) -> Vec<&ToolCapability> {
        self.capabilities
            .iter()
            .filter(|c| c.supports(intent) && !self.disabled.contains(&c.tool_name))
            .collect()
    }

    /// Pick the best tool for a processed message. Always returns a tool from
    /// the registry when one exists, falling back with low confidence.
    pub async fn select_tool(
        &self,
        result: &EnhancedProcessingResult,
        context: &ConversationContext,
        user_id: Option<&str>,
    ) -> ToolSelection {
        let intent = result.intent();
        let candidates = self.candidates(intent);
        if candidates.is_empty() {
            return self.fallback(intent);
        }

        let mut scored: Vec<(&ToolCapability, f64)> = candidates
            .iter()
            .map(|cap| (*cap, self.score(cap, intent, result.parameters(), user_id)))
            .collect();
        // Stable sort keeps registry order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (best, score) = scored[0];
        let alternative_tools = scored
            .iter()
            .skip(1)
            .take(MAX_ALTERNATIVES)
            .map(|(cap, s)| (cap.tool_name.clone(), *s))
            .collect();

        let mut parameters = adapt_parameters(best, result.parameters());
        let inferred = self.infer_parameters(best, intent, result.message(), context, &mut parameters).await;
        let validation_errors = validate(best, &parameters);

        let mut confidence = score;
        if !validation_errors.is_empty() {
            confidence *= 0.7;
        }
        if score < 0.5 {
            confidence *= 0.8;
        }
        if candidates.len() == 1 {
            confidence += 0.1;
        }
        if candidates.len() > 5 {
            confidence *= 0.9;
        }
        let confidence = confidence.min(1.0);

        tracing::debug!(
            tool = %best.tool_name,
            score,
            confidence,
            candidates = candidates.len(),
            errors = validation_errors.len(),
            "tool selected"
        );

        ToolSelection {
            selected_tool: best.tool_name.clone(),
            confidence,
            parameters,
            inferred_parameters: inferred,
            alternative_tools,
            selection_reason: format!(
                "{} best matches intent '{}' (score {:.2} of {} candidate(s))",
                best.tool_name,
                intent,
                score,
                candidates.len()
            ),
            validation_errors,
        }
    }

    fn fallback(&self, intent: Intent) -> ToolSelection {
        let tool = self
            .capabilities
            .iter()
            .find(|c| !self.disabled.contains(&c.tool_name))
            .or_else(|| self.capabilities.first())
            .map(|c| c.tool_name.clone())
            .unwrap_or_default();
        tracing::debug!(intent = %intent, fallback = %tool, "no compatible tool");

        let mut validation_errors = vec![format!("no available tool handles intent '{intent}'")];
        if tool.is_empty() {
            validation_errors.push("no tools are registered".to_string());
        }
        ToolSelection {
            selected_tool: tool,
            confidence: FALLBACK_CONFIDENCE,
            parameters: Params::new(),
            inferred_parameters: Params::new(),
            alternative_tools: Vec::new(),
            selection_reason: format!("fallback: nothing is compatible with '{intent}'"),
            validation_errors,
        }
    }

    fn score(&self, cap: &ToolCapability, intent: Intent, params: &Params, user_id: Option<&str>) -> f64 {
        let intent_match = if cap.supports(intent) { 1.0 } else { 0.0 };

        let coverage = if cap.required_parameters.is_empty() {
            1.0
        } else {
            let present = cap
                .required_parameters
                .iter()
                .filter(|p| params.contains_key(p.as_str()) || alias(p).is_some_and(|a| params.contains_key(a)))
                .count();
            present as f64 / cap.required_parameters.len() as f64
        };

        let perf = self.performance.get(&cap.tool_name);
        let history = match perf {
            Some(p) if p.total_executions > 0 => p.success_rate,
            _ => UNTRIED_SUCCESS_RATE,
        };

        let context_match = self
            .context_patterns
            .get(&intent)
            .map(|tools| {
                let total: u64 = tools.values().sum();
                let hits = tools.get(&cap.tool_name).copied().unwrap_or(0);
                if total == 0 {
                    0.0
                } else {
                    hits as f64 / total as f64
                }
            })
            .unwrap_or(0.0);

        let preference = user_id
            .and_then(|id| self.profiles.get(id))
            .map(|profile| {
                let total: u64 = profile.tool_usage.values().sum();
                let used = profile.tool_usage.get(&cap.tool_name).copied().unwrap_or(0);
                if total == 0 {
                    0.0
                } else {
                    used as f64 / total as f64
                }
            })
            .unwrap_or(0.0);

        let mut score = INTENT_WEIGHT * intent_match
            + PARAMETER_WEIGHT * coverage
            + HISTORY_WEIGHT * history
            + CONTEXT_WEIGHT * context_match
            + PREFERENCE_WEIGHT * preference;
        if perf.is_some_and(|p| p.succeeded_within(self.recency_window, Utc::now())) {
            score += RECENCY_BONUS;
        }
        score.min(1.0)
    }

    /// Fill required parameters still missing. Returns what was added.
    async fn infer_parameters(
        &self,
        cap: &ToolCapability,
        intent: Intent,
        message: &str,
        context: &ConversationContext,
        parameters: &mut Params,
    ) -> Params {
        let mut inferred = Params::new();

        for name in &cap.required_parameters {
            if parameters.contains_key(name) {
                continue;
            }
            let value = match name.as_str() {
                "note_path" => {
                    let titled = (cap.tool_name == "write_note")
                        .then(|| infer_title(message).map(|t| ensure_md(&t)))
                        .flatten();
                    titled.or_else(|| infer_file_path(message, &self.vault_files, context.current_note.as_deref()))
                }
                "query" => infer_query(message),
                "task" => infer_task(intent).map(str::to_string),
                "content" => infer_content(message),
                _ => None,
            };
            if let Some(value) = value {
                inferred.insert(name.clone(), Value::String(value.clone()));
                parameters.insert(name.clone(), Value::String(value));
            }
        }

        // AI tasks run on the note text; read it up front when possible.
        if cap.tool_name == "ai_process" && !parameters.contains_key("content") {
            if let (Some(vault), Some(path)) = (&self.vault, parameters.get("note_path").and_then(Value::as_str)) {
                match vault.read(path).await {
                    Ok(text) => {
                        inferred.insert("content".into(), Value::String(text.clone()));
                        parameters.insert("content".into(), Value::String(text));
                    }
                    Err(e) => tracing::debug!(path, error = %e, "content inference skipped"),
                }
            }
        }

        inferred
    }

    /// Fold an execution outcome into the statistics used for scoring.
    pub fn record_tool_execution_result(
        &mut self,
        tool: &str,
        success: bool,
        elapsed: Duration,
        error: Option<&str>,
        intent: Intent,
        user_id: Option<&str>,
    ) {
        self.performance
            .entry(tool.to_string())
            .or_default()
            .record(success, elapsed, error);

        if success {
            *self
                .context_patterns
                .entry(intent)
                .or_default()
                .entry(tool.to_string())
                .or_default() += 1;
            if let Some(user_id) = user_id {
                self.profiles.update(user_id, &mut |p| p.record_tool_use(tool));
            }
        }

        tracing::debug!(tool, success, elapsed_ms = elapsed.as_millis() as u64, "tool outcome recorded");
    }
}

/// The two search tools name their result count differently.
fn alias(parameter: &str) -> Option<&'static str> {
    match parameter {
        "limit" => Some("k"),
        "k" => Some("limit"),
        _ => None,
    }
}

/// Keep only parameters the tool accepts, renaming aliases.
fn adapt_parameters(cap: &ToolCapability, params: &Params) -> Params {
    let mut adapted = Params::new();
    for (key, value) in params {
        if cap.accepts(key) {
            adapted.insert(key.clone(), value.clone());
        } else if let Some(other) = alias(key).filter(|a| cap.accepts(a)) {
            adapted.insert(other.to_string(), value.clone());
        }
    }
    adapted
}

/// Shape checks on the final parameter set.
fn validate(cap: &ToolCapability, params: &Params) -> Vec<String> {
    let mut errors = Vec::new();
    for name in &cap.required_parameters {
        if !params.contains_key(name) {
            errors.push(format!("missing required parameter '{name}'"));
        }
    }
    if let Some(value) = params.get("note_path") {
        match value.as_str() {
            Some(path) if path.to_lowercase().ends_with(".md") => {}
            Some(path) => errors.push(format!("note path '{path}' must end with .md")),
            None => errors.push("note_path must be a string".to_string()),
        }
    }
    if let Some(value) = params.get("query") {
        match value.as_str() {
            Some(q) if q.trim().chars().count() >= 2 => {}
            _ => errors.push("query must be a string of at least 2 characters".to_string()),
        }
    }
    if let Some(value) = params.get("content") {
        if !value.is_string() {
            errors.push("content must be a string".to_string());
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::types::ProcessingResult;
    use crate::profile::InMemoryProfileStore;
    use serde_json::json;

    const ALL_TOOLS: &[&str] = &[
        "read_note",
        "write_note",
        "update_note",
        "search_notes",
        "vector_search",
        "list_notes",
        "ai_process",
    ];

    fn selector(tools: &[&str]) -> SmartToolSelector {
        SmartToolSelector::new(tools, &SelectionConfig::default(), Arc::new(InMemoryProfileStore::new()))
    }

    fn processed(intent: Intent, params: Params, message: &str) -> EnhancedProcessingResult {
        let mut result = EnhancedProcessingResult::from_base(ProcessingResult {
            intent,
            tool_name: None,
            parameters: params,
            confidence: 0.9,
            missing_parameters: vec![],
            suggestions: vec![],
            needs_confirmation: false,
            context_used: false,
        });
        result.user_learning_data.insert("message".into(), json!(message));
        result
    }

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn single_candidate_gets_bonus() {
        let s = selector(ALL_TOOLS);
        let r = processed(Intent::ReadNote, params(&[("note_path", json!("a.md"))]), "read a.md");
        let sel = s.select_tool(&r, &ConversationContext::new(), None).await;
        assert_eq!(sel.selected_tool, "read_note");
        // 0.4 + 0.3 + 0.2*0.1 = 0.72, +0.1 for a single candidate
        assert!((sel.confidence - 0.82).abs() < 1e-9);
        assert!(sel.is_valid());
    }

    #[tokio::test]
    async fn history_breaks_ties() {
        let mut s = selector(ALL_TOOLS);
        let r = processed(Intent::SearchNotes, params(&[("query", json!("rust"))]), "search for rust");

        let first = s.select_tool(&r, &ConversationContext::new(), None).await;
        assert_eq!(first.selected_tool, "search_notes");

        s.record_tool_execution_result("vector_search", true, Duration::from_millis(5), None, Intent::VectorSearch, None);
        s.record_tool_execution_result("search_notes", false, Duration::from_millis(5), Some("boom"), Intent::SearchNotes, None);

        let second = s.select_tool(&r, &ConversationContext::new(), None).await;
        assert_eq!(second.selected_tool, "vector_search");
        assert_eq!(second.alternative_tools[0].0, "search_notes");
    }

    #[tokio::test]
    async fn fallback_is_a_registered_tool() {
        let s = selector(&["list_notes", "read_note"]);
        let r = processed(Intent::Greeting, Params::new(), "hi");
        let sel = s.select_tool(&r, &ConversationContext::new(), None).await;
        assert_eq!(sel.selected_tool, "read_note");
        assert_eq!(sel.confidence, FALLBACK_CONFIDENCE);
        assert!(!sel.is_valid());
    }

    #[tokio::test]
    async fn disabled_tools_are_skipped() {
        let mut s = selector(ALL_TOOLS);
        assert!(s.set_tool_enabled("search_notes", false));
        assert!(!s.set_tool_enabled("nope", false));
        let r = processed(Intent::SearchNotes, params(&[("query", json!("rust"))]), "search for rust");
        let sel = s.select_tool(&r, &ConversationContext::new(), None).await;
        assert_eq!(sel.selected_tool, "vector_search");
    }

    #[tokio::test]
    async fn missing_parameters_are_inferred() {
        let mut s = selector(ALL_TOOLS);
        s.set_vault_files(vec!["recipes.md".into()]);
        let r = processed(Intent::Summarize, Params::new(), "summarize my recipes");
        let sel = s.select_tool(&r, &ConversationContext::new(), None).await;
        assert_eq!(sel.selected_tool, "ai_process");
        assert_eq!(sel.parameters["note_path"], "recipes.md");
        assert_eq!(sel.parameters["task"], "summarize");
        assert!(sel.inferred_parameters.contains_key("task"));
        assert!(sel.is_valid());
    }

    #[tokio::test]
    async fn bad_shapes_are_reported() {
        let s = selector(ALL_TOOLS);
        let r = processed(
            Intent::WriteNote,
            params(&[("note_path", json!("draft.txt")), ("content", json!(5))]),
            "",
        );
        let sel = s.select_tool(&r, &ConversationContext::new(), None).await;
        assert_eq!(sel.validation_errors.len(), 2, "{:?}", sel.validation_errors);
        // (0.4 + 0.3 + 0.02) * 0.7 + 0.1
        assert!((sel.confidence - 0.604).abs() < 1e-9);
    }

    #[test]
    fn adapt_renames_limit_for_vector_search() {
        let caps = default_capabilities();
        let vector = caps.iter().find(|c| c.tool_name == "vector_search").unwrap();
        let adapted = adapt_parameters(vector, &params(&[("query", json!("q")), ("limit", json!(3)), ("x", json!(1))]));
        assert_eq!(adapted.len(), 2);
        assert_eq!(adapted["k"], 3);
    }

    #[test]
    fn statistics_cover_every_capability() {
        let mut s = selector(ALL_TOOLS);
        s.record_tool_execution_result("read_note", false, Duration::from_millis(1), Some("note not found: x.md"), Intent::ReadNote, None);
        let stats = s.get_tool_statistics();
        assert_eq!(stats.len(), 7);
        assert_eq!(stats["read_note"].error_counts[&ErrorCategory::FileNotFound], 1);
    }
}
