//! Session-level orchestration.
//!
//! [`EnhancedChatAgent::chat`] routes each message: an active flow takes it
//! first, then slash commands, a pending confirmation, flow triggers and
//! finally the language processor → tool selector → tool → response chain.
//! `chat` always returns a reply; every failure is turned into text.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::VaultMindConfig;
use crate::flow::{classify_confirmation, ConversationFlowManager, FlowError, FlowResponse, FlowState};
use crate::history::{ConversationLog, MessageRole};
use crate::nlp::enhanced::EnhancedLanguageProcessor;
use crate::nlp::types::{EnhancedProcessingResult, Params};
use crate::profile::UserProfileStore;
use crate::response::{help_text, ContextAwareResponseGenerator, ResponseContext, ResponseType};
use crate::selection::{SmartToolSelector, ToolSelection};
use crate::tools::{ToolRegistry, ToolResult};
use crate::vault::Vault;

/// Tool steps a flow may run back to back within one message.
const MAX_FLOW_TOOL_STEPS: usize = 5;
const LOCAL_USER: &str = "local";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub messages_processed: u64,
    pub tools_executed: u64,
    pub tool_failures: u64,
    pub flows_started: u64,
    pub flows_completed: u64,
    pub successful_responses: u64,
    pub clarification_requests: u64,
}

/// A mutating action waiting on the user's yes or no.
struct PendingAction {
    result: EnhancedProcessingResult,
    selection: ToolSelection,
}

pub struct EnhancedChatAgent {
    processor: EnhancedLanguageProcessor,
    selector: SmartToolSelector,
    flows: ConversationFlowManager,
    responder: ContextAwareResponseGenerator,
    tools: ToolRegistry,
    vault: Arc<dyn Vault>,
    profiles: Arc<dyn UserProfileStore>,
    log: Option<Arc<dyn ConversationLog>>,
    user_id: Option<String>,
    active_flow_id: Option<String>,
    pending: Option<PendingAction>,
    stats: SessionStats,
    default_pattern: String,
    execution_threshold: f64,
}

impl EnhancedChatAgent {
    pub fn new(
        config: &VaultMindConfig,
        vault: Arc<dyn Vault>,
        tools: ToolRegistry,
        profiles: Arc<dyn UserProfileStore>,
    ) -> Self {
        let processor =
            EnhancedLanguageProcessor::new(&config.nlp, Some(config.resolved_vault_root()), profiles.clone());
        let selector = SmartToolSelector::new(&tools.enabled_names(), &config.selection, profiles.clone())
            .with_vault(vault.clone());
        Self {
            processor,
            selector,
            flows: ConversationFlowManager::new(&config.flows),
            responder: ContextAwareResponseGenerator::new(profiles.clone()),
            tools,
            vault,
            profiles,
            log: None,
            user_id: None,
            active_flow_id: None,
            pending: None,
            stats: SessionStats::default(),
            default_pattern: config.vault.default_pattern.clone(),
            execution_threshold: config.selection.execution_threshold,
        }
    }

    pub fn with_log(mut self, log: Arc<dyn ConversationLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn active_flow_id(&self) -> Option<&str> {
        self.active_flow_id.as_deref()
    }

    pub fn flows(&self) -> &ConversationFlowManager {
        &self.flows
    }

    pub fn selector(&self) -> &SmartToolSelector {
        &self.selector
    }

    pub fn processor(&self) -> &EnhancedLanguageProcessor {
        &self.processor
    }

    /// Switch a tool on or off for both execution and selection.
    pub fn set_tool_enabled(&mut self, tool: &str, enabled: bool) -> bool {
        let known = self.tools.set_enabled(tool, enabled);
        self.selector.set_tool_enabled(tool, enabled);
        known
    }

    /// Handle one user message and return the reply.
    pub async fn chat(&mut self, message: &str) -> String {
        self.stats.messages_processed += 1;
        self.append_log(MessageRole::User, message);
        self.refresh_vault_files().await;

        if !self.flows.cleanup_expired_flows().is_empty() {
            let still_active = self
                .active_flow_id
                .as_deref()
                .is_some_and(|id| self.flows.execution(id).is_some());
            if !still_active {
                self.active_flow_id = None;
            }
        }

        let reply = self.respond(message.trim()).await;
        self.append_log(MessageRole::Assistant, &reply);
        reply
    }

    async fn respond(&mut self, message: &str) -> String {
        if let Some(execution_id) = self.active_flow_id.clone() {
            return self.continue_flow(&execution_id, message).await;
        }
        if message.starts_with('/') {
            return self.command(message);
        }

        if let Some(pending) = self.pending.take() {
            match classify_confirmation(message) {
                Some(true) => return self.execute_and_respond(pending.result, pending.selection).await,
                Some(false) => {
                    self.stats.successful_responses += 1;
                    return "Okay, I won't do that.".to_string();
                }
                None => debug!("pending confirmation dropped"),
            }
        }

        let user = self.user_id.clone();
        let result = self.processor.process_message(message, user.as_deref());

        if let Some(flow_id) = self.flows.find_triggered_flow(message).map(|f| f.flow_id.clone()) {
            return self.start_flow(&flow_id);
        }

        let selection = self
            .selector
            .select_tool(&result, self.processor.context(), user.as_deref())
            .await;
        debug!(
            intent = %result.intent(),
            tool = %selection.selected_tool,
            confidence = selection.confidence,
            "selection made"
        );

        let actionable = selection.confidence > self.execution_threshold
            && selection.is_valid()
            && !result.requires_clarification
            && self.tools.is_enabled(&selection.selected_tool);
        if !actionable {
            return self.reply_without_tool(&result, &selection);
        }

        if result.base.needs_confirmation {
            let shown = with_parameters(&result, &selection);
            let reply = self.reply_with(&shown, None, Vec::new());
            self.pending = Some(PendingAction { result, selection });
            return reply;
        }

        self.execute_and_respond(result, selection).await
    }

    async fn execute_and_respond(&mut self, result: EnhancedProcessingResult, selection: ToolSelection) -> String {
        let tool_result = self.run_tool(&selection.selected_tool, &selection.parameters, &result).await;
        let shown = with_parameters(&result, &selection);
        self.reply_with(&shown, Some(&tool_result), vec![selection.selected_tool.clone()])
    }

    async fn run_tool(&mut self, tool: &str, params: &Params, result: &EnhancedProcessingResult) -> ToolResult {
        let start = Instant::now();
        let tool_result = self.tools.execute(tool, params).await;
        let success = tool_result.is_success();
        self.stats.tools_executed += 1;
        if !success {
            self.stats.tool_failures += 1;
        }
        let error = (!success).then(|| tool_result.error_text().to_string());
        self.selector.record_tool_execution_result(
            tool,
            success,
            start.elapsed(),
            error.as_deref(),
            result.intent(),
            self.user_id.as_deref(),
        );
        tool_result
    }

    fn reply_without_tool(&mut self, result: &EnhancedProcessingResult, selection: &ToolSelection) -> String {
        let mut shown = result.clone();
        if result.intent().entity_key().is_some() || result.base.tool_name.is_some() {
            for error in &selection.validation_errors {
                shown.base.suggestions.push(capitalize(error));
            }
        }
        self.reply_with(&shown, None, Vec::new())
    }

    /// Generate, count and remember a reply.
    fn reply_with(
        &mut self,
        result: &EnhancedProcessingResult,
        tool_result: Option<&ToolResult>,
        tool_calls: Vec<String>,
    ) -> String {
        let context = ResponseContext::build(
            self.processor.context(),
            self.processor.vault_files(),
            self.user_id.as_deref(),
            self.profiles.as_ref(),
        );
        let response = self.responder.generate_response(result, &context, tool_result);
        match response.response_type {
            ResponseType::Clarification => self.stats.clarification_requests += 1,
            ResponseType::Success | ResponseType::Informational => self.stats.successful_responses += 1,
            ResponseType::Confirmation | ResponseType::Error => {}
        }
        self.processor.record_exchange(result, &response.content, tool_calls);
        response.render()
    }

    // ── Flows ───────────────────────────────────────────────────────

    fn start_flow(&mut self, flow_id: &str) -> String {
        let user = self.user_id.clone().unwrap_or_else(|| LOCAL_USER.to_string());
        match self.flows.start_flow(flow_id, &user, Params::new()) {
            Ok(response) => {
                self.stats.flows_started += 1;
                self.active_flow_id = Some(response.execution_id.clone());
                info!(flow_id, "flow triggered");
                format!("{}\n(Say 'cancel' at any time to stop.)", response.message)
            }
            Err(e) => {
                warn!(flow_id, error = %e, "could not start flow");
                format!("I couldn't start that: {e}")
            }
        }
    }

    async fn continue_flow(&mut self, execution_id: &str, message: &str) -> String {
        if message == "/cancel" {
            return self.cancel_active_flow();
        }
        if message.starts_with('/') {
            return self.command(message);
        }

        let result = self.processor.process_message(message, self.user_id.as_deref());
        let mut transcript = Vec::new();
        let mut outcome = self.flows.process_flow_input(execution_id, message, Some(&result));

        for _ in 0..MAX_FLOW_TOOL_STEPS {
            let request = match &outcome {
                Ok(FlowResponse {
                    tool_request: Some(request),
                    message,
                    ..
                }) => {
                    transcript.push(message.clone());
                    request.clone()
                }
                _ => break,
            };
            let tool_result = self.run_tool(&request.tool_name, &request.parameters, &result).await;
            if let Err(e) = self.flows.record_tool_result(execution_id, &tool_result) {
                warn!(execution_id, error = %e, "could not record flow tool result");
            }
            if !tool_result.is_success() {
                outcome = self.flows.fail_flow(execution_id, tool_result.error_text());
                break;
            }
            if !tool_result.content.is_empty() {
                transcript.push(tool_result.content.clone());
            }
            outcome = self.flows.process_flow_input(execution_id, "", None);
        }

        match outcome {
            Ok(response) => {
                if response.is_finished() {
                    self.active_flow_id = None;
                    if response.state == FlowState::Completed {
                        self.stats.flows_completed += 1;
                        self.stats.successful_responses += 1;
                    }
                }
                transcript.push(response.message);
            }
            Err(e) => {
                warn!(execution_id, error = %e, "flow input failed");
                transcript.push(self.recover_flow(execution_id, &e));
            }
        }
        transcript.retain(|line| !line.is_empty());
        transcript.join("\n\n")
    }

    /// Abandon a flow that can no longer make progress.
    fn recover_flow(&mut self, execution_id: &str, error: &FlowError) -> String {
        let stuck = self
            .flows
            .execution(execution_id)
            .is_none_or(|e| e.state == FlowState::Error);
        if stuck {
            if self.flows.execution(execution_id).is_some() {
                if let Err(e) = self.flows.cancel_flow(execution_id, "error") {
                    warn!(execution_id, error = %e, "failed to cancel stuck flow");
                }
            }
            self.active_flow_id = None;
            format!("Something went wrong with that flow ({error}), so I've stopped it.")
        } else {
            format!("I couldn't use that: {error}")
        }
    }

    fn cancel_active_flow(&mut self) -> String {
        let Some(execution_id) = self.active_flow_id.take() else {
            return "There's no active flow to cancel.".to_string();
        };
        match self.flows.cancel_flow(&execution_id, "cancelled by user") {
            Ok(response) => response.message,
            Err(e) => format!("Nothing to cancel: {e}"),
        }
    }

    // ── Commands ────────────────────────────────────────────────────

    fn command(&mut self, message: &str) -> String {
        let command = message.split_whitespace().next().unwrap_or_default().to_lowercase();
        debug!(command = %command, "slash command");
        match command.as_str() {
            "/help" => format!("Here's what I can do:\n{}", help_text()),
            "/stats" => self.stats_report(),
            "/features" => features_text(&self.tools.enabled_names()),
            "/patterns" => self.patterns_report(),
            "/flows" => self
                .flows
                .flows()
                .map(|f| format!("  • {}: {}", f.name, f.description))
                .collect::<Vec<_>>()
                .join("\n"),
            "/cancel" => self.cancel_active_flow(),
            "/reset" => {
                if let Some(id) = self.active_flow_id.take() {
                    if let Err(e) = self.flows.cancel_flow(&id, "reset") {
                        warn!(execution_id = %id, error = %e, "failed to cancel flow on reset");
                    }
                }
                self.pending = None;
                self.processor.context_mut().clear();
                self.stats = SessionStats::default();
                "Conversation reset.".to_string()
            }
            other => format!("Unknown command {other}. Try /help."),
        }
    }

    fn stats_report(&self) -> String {
        let s = &self.stats;
        let mut lines = vec![
            format!("Messages processed: {}", s.messages_processed),
            format!("Tools executed: {} ({} failed)", s.tools_executed, s.tool_failures),
            format!("Flows started: {} / completed: {}", s.flows_started, s.flows_completed),
            format!("Successful responses: {}", s.successful_responses),
            format!("Clarification requests: {}", s.clarification_requests),
        ];
        for (tool, perf) in self.selector.get_tool_statistics() {
            if perf.total_executions > 0 {
                lines.push(format!(
                    "  {tool}: {} run(s), {:.0}% success, {:.0} ms avg",
                    perf.total_executions,
                    perf.success_rate * 100.0,
                    perf.avg_latency_ms
                ));
            }
        }
        let flows = self.flows.statistics();
        lines.push(format!(
            "Flows active: {}, cancelled: {}, timed out: {}",
            flows.active, flows.cancelled, flows.timed_out
        ));
        lines.join("\n")
    }

    fn patterns_report(&self) -> String {
        let Some(user) = self.user_id.as_deref() else {
            return "Patterns are tracked per user. Start the chat with --user <id>.".to_string();
        };
        let Some(profile) = self.profiles.get(user) else {
            return "Nothing learned yet.".to_string();
        };
        let mut lines = vec![format!("Preferred style: {}", profile.preferred_style.as_str())];
        if let Some(intent) = profile.most_common_intent() {
            lines.push(format!("Most common request: {intent}"));
        }
        if let Some(tool) = profile.preferred_tool() {
            lines.push(format!("Most used tool: {tool}"));
        }
        let files = profile.top_files(5);
        if !files.is_empty() {
            let list: Vec<String> = files.iter().map(|(f, n)| format!("{f} ({n})")).collect();
            lines.push(format!("Top notes: {}", list.join(", ")));
        }
        lines.join("\n")
    }

    // ── Plumbing ────────────────────────────────────────────────────

    async fn refresh_vault_files(&mut self) {
        match self.vault.list(&self.default_pattern).await {
            Ok(files) => {
                self.selector.set_vault_files(files.clone());
                self.processor.set_vault_files(files);
            }
            Err(e) => warn!(error = %e, "could not list vault"),
        }
    }

    fn append_log(&self, role: MessageRole, content: &str) {
        if let Some(log) = &self.log {
            if let Err(e) = log.append(role, content) {
                warn!(error = %e, "failed to write conversation log");
            }
        }
    }
}

/// The processing result with the selector's final parameter set.
fn with_parameters(result: &EnhancedProcessingResult, selection: &ToolSelection) -> EnhancedProcessingResult {
    let mut shown = result.clone();
    shown.base.parameters = selection.parameters.clone();
    shown.base.tool_name = Some(selection.selected_tool.clone());
    for (key, value) in &selection.inferred_parameters {
        shown.inferred_parameters.insert(key.clone(), value.clone());
    }
    shown
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn features_text(tools: &[&str]) -> String {
    format!(
        "Features:\n  • Intent recognition with fuzzy note matching\n  • Context-aware follow-ups (\"summarize it\")\n  • Learned tool and style preferences\n  • Guided flows: note creation and topic research\n  • Tools: {}",
        tools.join(", ")
    )
}
