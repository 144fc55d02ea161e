//! Rolling conversation context: the last few turns plus what they were about.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::LazyLock;

use super::types::{Intent, IntentResult, Params};

pub const DEFAULT_MAX_TURNS: usize = 10;
const MAX_RECENT: usize = 5;
const CONTEXT_BOOST: f64 = 0.2;

static PRONOUN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(?:this|that|the|last|same|previous)\s+(?:note|file|one)|it|this|that)\b")
        .expect("valid regex")
});
static REPEAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:again|more|same\s+(?:query|search)|continue)\b").expect("valid regex")
});

/// One exchange between the user and the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    pub intent: Intent,
    pub entities: Params,
    pub agent_response: String,
    pub tool_calls: Vec<String>,
}

impl Turn {
    pub fn new(intent_result: &IntentResult, agent_response: &str, tool_calls: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            user_message: intent_result.raw_text.clone(),
            intent: intent_result.intent,
            entities: intent_result.entities.clone(),
            agent_response: agent_response.to_string(),
            tool_calls,
        }
    }
}

/// Coarse subject of the recent conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationTopic {
    NoteReading,
    NoteWriting,
    Searching,
    AiProcessing,
    VaultManagement,
    General,
}

impl ConversationTopic {
    fn of(intent: Intent) -> Self {
        match intent {
            Intent::ReadNote => Self::NoteReading,
            Intent::WriteNote | Intent::UpdateNote | Intent::DeleteNote => Self::NoteWriting,
            Intent::SearchNotes | Intent::VectorSearch => Self::Searching,
            Intent::Summarize | Intent::Enhance | Intent::ExtractInsights | Intent::GenerateQuestions => {
                Self::AiProcessing
            }
            Intent::ListNotes | Intent::VaultInfo | Intent::VaultStats => Self::VaultManagement,
            Intent::Help | Intent::Greeting | Intent::Unknown => Self::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoteReading => "note_reading",
            Self::NoteWriting => "note_writing",
            Self::Searching => "searching",
            Self::AiProcessing => "ai_processing",
            Self::VaultManagement => "vault_management",
            Self::General => "general",
        }
    }
}

/// Intent pairs where the second naturally follows the first.
const RELATED: &[(Intent, &[Intent])] = &[
    (
        Intent::ReadNote,
        &[
            Intent::Summarize,
            Intent::Enhance,
            Intent::ExtractInsights,
            Intent::GenerateQuestions,
            Intent::UpdateNote,
        ],
    ),
    (Intent::SearchNotes, &[Intent::ReadNote, Intent::VectorSearch]),
    (Intent::VectorSearch, &[Intent::ReadNote, Intent::SearchNotes]),
    (Intent::WriteNote, &[Intent::UpdateNote, Intent::ReadNote, Intent::Enhance]),
    (Intent::ListNotes, &[Intent::ReadNote]),
    (Intent::Summarize, &[Intent::ExtractInsights, Intent::GenerateQuestions]),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    turns: VecDeque<Turn>,
    max_turns: usize,
    pub current_note: Option<String>,
    pub current_query: Option<String>,
    pub recent_notes: Vec<String>,
    pub recent_queries: Vec<String>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::with_max_turns(DEFAULT_MAX_TURNS)
    }

    pub fn with_max_turns(max_turns: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
            ..Default::default()
        }
    }

    /// Append a turn, evicting the oldest past the window, and pick up any
    /// note or query it mentioned.
    pub fn add_turn(&mut self, turn: Turn) {
        if let Some(note) = turn.entities.get("note_path").and_then(Value::as_str) {
            if !is_pronoun(note) {
                self.record_note(note);
            }
        }
        if let Some(query) = turn.entities.get("query").and_then(Value::as_str) {
            self.record_query(query);
        }
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn record_note(&mut self, note: &str) {
        self.current_note = Some(note.to_string());
        push_recent(&mut self.recent_notes, note);
    }

    pub fn record_query(&mut self, query: &str) {
        self.current_query = Some(query.to_string());
        push_recent(&mut self.recent_queries, query);
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        let max_turns = self.max_turns;
        *self = Self::with_max_turns(max_turns);
    }

    /// Majority topic over the last three turns. Ties go to the most recent.
    pub fn topic(&self) -> ConversationTopic {
        let recent: Vec<ConversationTopic> = self
            .turns
            .iter()
            .rev()
            .take(3)
            .map(|t| ConversationTopic::of(t.intent))
            .collect();

        let mut best = ConversationTopic::General;
        let mut best_count = 0;
        for topic in &recent {
            let count = recent.iter().filter(|t| *t == topic).count();
            if count > best_count {
                best = *topic;
                best_count = count;
            }
        }
        best
    }

    /// Same intent as the previous turn, or a known related successor.
    pub fn is_follow_up(&self, intent: Intent) -> bool {
        let Some(last) = self.last_turn() else {
            return false;
        };
        if last.intent == intent && intent != Intent::Unknown {
            return true;
        }
        RELATED
            .iter()
            .any(|(prev, next)| *prev == last.intent && next.contains(&intent))
    }

    /// Parameters the message leaves implicit but the context can fill in.
    pub fn implicit_parameters(&self, result: &IntentResult) -> Params {
        let mut params = Params::new();
        let text = result.raw_text.as_str();

        if result.intent.targets_note() {
            let stated = result.entity_str("note_path").filter(|p| !is_pronoun(p));
            if stated.is_none() {
                let refers_back = PRONOUN_RE.is_match(text)
                    || REPEAT_RE.is_match(text)
                    || result.intent.is_ai_processing()
                    || (result.intent != Intent::WriteNote && self.is_follow_up(result.intent));
                if let (true, Some(note)) = (refers_back, &self.current_note) {
                    params.insert("note_path".into(), Value::String(note.clone()));
                }
            }
        }

        if result.intent.is_search() && result.entity_str("query").is_none() {
            if let (true, Some(query)) = (REPEAT_RE.is_match(text), &self.current_query) {
                params.insert("query".into(), Value::String(query.clone()));
            }
        }

        params
    }

    /// Merge implicit parameters into a copy of `result`, boosting its
    /// confidence when the context supplied anything.
    pub fn enhance_intent_result(&self, result: &IntentResult) -> IntentResult {
        let implicit = self.implicit_parameters(result);
        let mut enhanced = result.clone();
        if implicit.is_empty() {
            return enhanced;
        }
        for (key, value) in implicit {
            enhanced.entities.insert(key, value);
        }
        enhanced.confidence = (enhanced.confidence + CONTEXT_BOOST).min(1.0);
        tracing::debug!(
            intent = %enhanced.intent,
            confidence = enhanced.confidence,
            "context supplied implicit parameters"
        );
        enhanced
    }
}

pub(crate) fn is_pronoun(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    let v = v.trim_end_matches(".md");
    PRONOUN_RE
        .find(v)
        .is_some_and(|m| m.start() == 0 && m.end() == v.len())
        || matches!(v, "it again" | "this one" | "that one")
}

fn push_recent(list: &mut Vec<String>, item: &str) {
    list.retain(|existing| existing != item);
    list.insert(0, item.to_string());
    list.truncate(MAX_RECENT);
}
