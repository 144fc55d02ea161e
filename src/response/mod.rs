//! Reply generation.
//!
//! [`ContextAwareResponseGenerator`] picks a [`ResponseType`] for a processed
//! message (and the tool result, when a tool ran), fills the matching
//! template, then layers on file-match hints, follow-up actions,
//! per-user styling and a time-of-day suggestion.

use chrono::Timelike;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::nlp::context::{ConversationContext, ConversationTopic};
use crate::nlp::types::{EnhancedProcessingResult, Intent};
use crate::profile::{ResponseStyle, UserProfileStore};
use crate::selection::ErrorCategory;
use crate::tools::ToolResult;

/// Below this the reply asks for clarification instead of acting.
pub const CLARIFICATION_THRESHOLD: f64 = 0.5;
const MAX_SUGGESTIONS: usize = 5;
const CONCISE_SUGGESTIONS: usize = 2;

static FILLER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:just|basically|actually|really|simply|of course)\s+").expect("valid regex")
});
static OPENER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:sure|okay|alright|great)[!,.]\s*").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Informational,
    Confirmation,
    Error,
    Success,
    Clarification,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::Confirmation => "confirmation",
            Self::Error => "error",
            Self::Success => "success",
            Self::Clarification => "clarification",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-message inputs the templates draw on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseContext {
    pub user_id: Option<String>,
    pub style: ResponseStyle,
    pub topic: ConversationTopic,
    pub recent_notes: Vec<String>,
    pub vault_note_count: usize,
    pub turn_count: usize,
    /// Local hour, 0-23.
    pub hour: u32,
}

impl ResponseContext {
    pub fn build(
        context: &ConversationContext,
        vault_files: &[String],
        user_id: Option<&str>,
        profiles: &dyn UserProfileStore,
    ) -> Self {
        let style = user_id
            .and_then(|id| profiles.get(id))
            .map(|p| p.preferred_style)
            .unwrap_or_default();
        Self {
            user_id: user_id.map(str::to_string),
            style,
            topic: context.topic(),
            recent_notes: context.recent_notes.clone(),
            vault_note_count: vault_files.len(),
            turn_count: context.len(),
            hour: chrono::Local::now().hour(),
        }
    }

    pub fn with_hour(mut self, hour: u32) -> Self {
        self.hour = hour % 24;
        self
    }
}

impl Default for ResponseContext {
    fn default() -> Self {
        Self {
            user_id: None,
            style: ResponseStyle::default(),
            topic: ConversationTopic::General,
            recent_notes: Vec::new(),
            vault_note_count: 0,
            turn_count: 0,
            hour: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedResponse {
    pub content: String,
    pub response_type: ResponseType,
    pub suggestions: Vec<String>,
    pub follow_up_actions: Vec<String>,
    pub requires_input: bool,
    pub confidence: f64,
}

impl GeneratedResponse {
    /// Content plus a bulleted suggestion list, as shown to the user.
    pub fn render(&self) -> String {
        if self.suggestions.is_empty() {
            return self.content.clone();
        }
        let bullets: Vec<String> = self.suggestions.iter().map(|s| format!("  • {s}")).collect();
        format!("{}\n\nSuggestions:\n{}", self.content, bullets.join("\n"))
    }
}

/// Lead sentence plus optional verbatim body (note text, search hits).
struct Draft {
    lead: String,
    body: Option<String>,
    suggestions: Vec<String>,
    requires_input: bool,
}

impl Draft {
    fn new(lead: impl Into<String>) -> Self {
        Self {
            lead: lead.into(),
            body: None,
            suggestions: Vec::new(),
            requires_input: false,
        }
    }
}

pub struct ContextAwareResponseGenerator {
    profiles: Arc<dyn UserProfileStore>,
}

impl ContextAwareResponseGenerator {
    pub fn new(profiles: Arc<dyn UserProfileStore>) -> Self {
        Self { profiles }
    }

    /// Pick the response type for `result` (and `tool_result`, if a tool ran).
    /// A tool outcome always wins: once a tool has run the reply reports it.
    pub fn response_type(result: &EnhancedProcessingResult, tool_result: Option<&ToolResult>) -> ResponseType {
        if let Some(tool_result) = tool_result {
            return if tool_result.is_success() {
                ResponseType::Success
            } else {
                ResponseType::Error
            };
        }
        if result.requires_clarification || result.confidence() < CLARIFICATION_THRESHOLD {
            ResponseType::Clarification
        } else if result.base.needs_confirmation {
            ResponseType::Confirmation
        } else {
            ResponseType::Informational
        }
    }

    pub fn generate_response(
        &self,
        result: &EnhancedProcessingResult,
        context: &ResponseContext,
        tool_result: Option<&ToolResult>,
    ) -> GeneratedResponse {
        let response_type = Self::response_type(result, tool_result);
        let mut draft = match (response_type, tool_result) {
            (ResponseType::Success, Some(tool)) => success(result, tool),
            (ResponseType::Error, Some(tool)) => error(result, tool),
            (ResponseType::Clarification, _) => clarification(result),
            (ResponseType::Confirmation, _) => confirmation(result),
            _ => informational(result, context),
        };

        for m in &result.file_matches {
            let hint = format!("Did you mean {}?", m.path);
            if !draft.suggestions.contains(&hint) && result.base.param_str("note_path") != Some(m.path.as_str()) {
                draft.suggestions.push(hint);
            }
        }
        let time_hint = time_of_day_suggestion(context.hour).to_string();
        if !draft.suggestions.contains(&time_hint) {
            draft.suggestions.push(time_hint);
        }
        draft.suggestions.truncate(MAX_SUGGESTIONS);

        if context.user_id.is_some() {
            personalize(&mut draft, context);
        }

        let content = match &draft.body {
            Some(body) if !body.is_empty() => format!("{}\n\n{}", draft.lead, body),
            _ => draft.lead.clone(),
        };
        let follow_up_actions = follow_up_actions(result.intent())
            .iter()
            .map(|s| s.to_string())
            .collect();

        if let Some(user_id) = &context.user_id {
            self.learn(user_id, result, response_type, tool_result);
        }

        tracing::debug!(
            response_type = %response_type,
            intent = %result.intent(),
            suggestions = draft.suggestions.len(),
            "response generated"
        );

        GeneratedResponse {
            content,
            response_type,
            suggestions: draft.suggestions,
            follow_up_actions,
            requires_input: draft.requires_input,
            confidence: result.confidence(),
        }
    }

    /// Outcome bookkeeping. Notes the tool touched that the user did not
    /// name (inferred or fuzzy-matched) count as accessed.
    fn learn(&self, user_id: &str, result: &EnhancedProcessingResult, response_type: ResponseType, tool: Option<&ToolResult>) {
        let touched = tool
            .filter(|t| t.is_success())
            .and_then(|t| t.metadata.get("note_path"))
            .and_then(Value::as_str)
            .filter(|path| result.base.param_str("note_path") != Some(*path))
            .map(str::to_string);
        let intent = result.intent();
        self.profiles.update(user_id, &mut |profile| {
            profile.push_history(intent, response_type.as_str());
            if let Some(path) = &touched {
                profile.record_file_access(path);
            }
        });
    }
}

// ── Builders ────────────────────────────────────────────────────────

fn success(result: &EnhancedProcessingResult, tool: &ToolResult) -> Draft {
    let meta_str = |key: &str| tool.metadata.get(key).and_then(Value::as_str).map(str::to_string);
    let note = meta_str("note_path")
        .or_else(|| result.base.param_str("note_path").map(str::to_string))
        .unwrap_or_else(|| "the note".to_string());

    let mut draft = match result.intent() {
        Intent::ReadNote => {
            let mut d = Draft::new(format!("Here's {note}:"));
            d.body = Some(tool.content.clone());
            d
        }
        Intent::WriteNote => Draft::new(format!("Created {note}.")),
        Intent::UpdateNote => {
            let mode = meta_str("mode").unwrap_or_else(|| "append".to_string());
            let mut d = Draft::new(format!("Updated {note} ({mode})."));
            if let Some(backup) = meta_str("backup") {
                d.lead.push_str(&format!(" Backup saved as {backup}."));
            }
            d
        }
        Intent::SearchNotes | Intent::VectorSearch => {
            let count = tool.metadata.get("count").and_then(Value::as_u64).unwrap_or(0);
            let query = meta_str("query")
                .or_else(|| result.base.param_str("query").map(str::to_string))
                .unwrap_or_default();
            if count == 0 {
                let mut d = Draft::new(format!("No notes matched \"{query}\"."));
                d.suggestions.push("Try fewer or different words".to_string());
                d
            } else {
                let mut d = Draft::new(format!("Found {count} match(es) for \"{query}\":"));
                d.body = Some(tool.content.clone());
                d
            }
        }
        Intent::Summarize | Intent::Enhance | Intent::ExtractInsights | Intent::GenerateQuestions => {
            let task = meta_str("task").unwrap_or_else(|| result.intent().as_str().to_string());
            let mut d = Draft::new(format!("Here's the {} for {note}:", task.replace('_', " ")));
            d.body = Some(tool.content.clone());
            d
        }
        _ => {
            let mut d = Draft::new("Done.");
            d.body = Some(tool.content.clone());
            d
        }
    };
    if draft.body.is_none() && !tool.content.is_empty() && result.intent().is_mutating() {
        draft.suggestions.push(format!("Read {note} to check the result"));
    }
    draft
}

fn error(result: &EnhancedProcessingResult, tool: &ToolResult) -> Draft {
    let message = tool.error_text();
    let mut draft = Draft::new(format!("I couldn't {}: {message}", result.intent().describe()));
    match ErrorCategory::categorize(message) {
        ErrorCategory::FileNotFound => {
            if result.file_matches.is_empty() {
                draft.suggestions.push("Say 'list notes' to see what's in the vault".to_string());
            }
        }
        ErrorCategory::PermissionDenied => {
            draft.suggestions.push("Check the vault's file permissions".to_string());
        }
        ErrorCategory::Timeout => {
            draft.suggestions.push("The AI backend is slow or down; try again shortly".to_string());
        }
        ErrorCategory::ParameterError => {
            draft.suggestions.extend(result.base.suggestions.iter().cloned());
        }
        ErrorCategory::Unknown => {}
    }
    if message.to_lowercase().contains("unreachable") {
        draft.suggestions.push("Make sure Ollama is running (ollama serve)".to_string());
    }
    draft
}

fn clarification(result: &EnhancedProcessingResult) -> Draft {
    let lead = result
        .clarification_question
        .clone()
        .unwrap_or_else(|| match result.intent() {
            Intent::Unknown => "I'm not sure what you'd like me to do.".to_string(),
            intent => format!("I think you want to {}, but I need a bit more.", intent.describe()),
        });
    let mut draft = Draft::new(lead);
    draft.requires_input = true;
    draft.suggestions.extend(result.base.suggestions.iter().cloned());
    for (intent, _) in &result.alternative_interpretations {
        draft.suggestions.push(format!("Did you want to {}?", intent.describe()));
    }
    draft
        .suggestions
        .extend(result.suggested_completions.iter().map(|c| format!("Try: {c}")));
    draft
}

fn confirmation(result: &EnhancedProcessingResult) -> Draft {
    let target = result
        .base
        .param_str("note_path")
        .map(|p| format!(" {p}"))
        .unwrap_or_default();
    let mut lead = format!("I'm about to {}{target}.", result.intent().describe());
    if result.inferred_parameters.contains_key("note_path") {
        lead.push_str(" I guessed the note name from your message.");
    }
    lead.push_str(" Shall I go ahead? (yes/no)");
    let mut draft = Draft::new(lead);
    draft.requires_input = true;
    if let Some(content) = result.base.param_str("content") {
        draft.body = Some(format!("Content:\n{content}"));
    }
    draft
}

fn informational(result: &EnhancedProcessingResult, context: &ResponseContext) -> Draft {
    match result.intent() {
        Intent::Help => {
            let mut d = Draft::new("Here's what I can do:");
            d.body = Some(help_text().to_string());
            d
        }
        Intent::Greeting => {
            let mut d = Draft::new(format!("{} What would you like to do with your notes?", greeting(context.hour)));
            if let Some(recent) = context.recent_notes.first() {
                d.suggestions.push(format!("Pick up where you left off with {recent}"));
            }
            d
        }
        Intent::Unknown => {
            let mut d = Draft::new("I'm not sure what you'd like me to do.");
            d.requires_input = true;
            d.suggestions.extend(result.base.suggestions.iter().cloned());
            d
        }
        intent => {
            let mut d = Draft::new(format!("I understood you want to {}.", intent.describe()));
            d.suggestions.extend(result.base.suggestions.iter().cloned());
            d.requires_input = !result.base.missing_parameters.is_empty();
            d
        }
    }
}

fn personalize(draft: &mut Draft, context: &ResponseContext) {
    match context.style {
        ResponseStyle::Concise => {
            let lead = OPENER_RE.replace(&draft.lead, "").into_owned();
            draft.lead = FILLER_RE.replace_all(&lead, "").into_owned();
            draft.suggestions.truncate(CONCISE_SUGGESTIONS);
        }
        ResponseStyle::Detailed => {
            let mut extra = format!("Your vault has {} note(s).", context.vault_note_count);
            if !context.recent_notes.is_empty() {
                extra.push_str(&format!(" Recently used: {}.", context.recent_notes.join(", ")));
            }
            draft.lead = format!("{} {extra}", draft.lead);
        }
        ResponseStyle::Balanced => {}
    }
}

// ── Tables ──────────────────────────────────────────────────────────

/// Natural follow-ups after a request of each kind.
pub fn follow_up_actions(intent: Intent) -> &'static [&'static str] {
    match intent {
        Intent::ReadNote => &["summarize", "ask_questions", "enhance"],
        Intent::WriteNote => &["read_note", "enhance", "update_note"],
        Intent::UpdateNote => &["read_note", "summarize"],
        Intent::SearchNotes => &["read_note", "refine_search", "vector_search"],
        Intent::VectorSearch => &["read_note", "refine_search", "search_notes"],
        Intent::ListNotes => &["read_note", "search_notes"],
        Intent::Summarize => &["extract_insights", "generate_questions"],
        Intent::Enhance => &["update_note", "read_note"],
        Intent::ExtractInsights => &["generate_questions", "write_note"],
        Intent::GenerateQuestions => &["search_notes", "write_note"],
        _ => &[],
    }
}

pub fn time_of_day_suggestion(hour: u32) -> &'static str {
    match hour {
        5..=11 => "Morning: start today's daily note",
        12..=16 => "Afternoon: capture meeting notes while they're fresh",
        17..=21 => "Evening: summarize what you worked on today",
        _ => "Late night: jot down tomorrow's priorities",
    }
}

fn greeting(hour: u32) -> &'static str {
    match hour {
        5..=11 => "Good morning!",
        12..=16 => "Good afternoon!",
        17..=21 => "Good evening!",
        _ => "Hello!",
    }
}

pub fn help_text() -> &'static str {
    "  • read <note>            e.g. read project-ideas.md\n\
     \x20 • create a note called <name> saying <text>\n\
     \x20 • add <text> to <note> / replace <note> with <text>\n\
     \x20 • search for <words> / find notes similar to <words>\n\
     \x20 • list notes [in <folder>]\n\
     \x20 • summarize / enhance / extract insights from / generate questions about <note>\n\
     \x20 • guide me to create a note / help me research <topic>\n\
     \x20 • /help /stats /features /patterns /flows /cancel /reset"
}
